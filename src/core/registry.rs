//! 订单注册表
//!
//! 进程内唯一的共享可变资源。映射本身由 RwLock 保护，每个订单再各自持有一把 Mutex：
//! 同一订单的更新串行化，不同订单互不阻塞。订单从不删除。
//!
//! 每个订单另带一个「首条管理员视图已落定」信号：首发成功写入句柄或首发失败时置位。
//! 状态变更刷新视图前先等它，避免首发仍在途时重复发出第二条视图。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};

use super::error::OrderError;
use super::order::{Order, OrderId, OrderStatus, UserId, ViewHandle};

struct Entry {
    order: Mutex<Order>,
    view_settled: watch::Sender<bool>,
}

impl Entry {
    fn new(order: Order) -> Self {
        let (view_settled, _) = watch::channel(false);
        Self {
            order: Mutex::new(order),
            view_settled,
        }
    }
}

type Slot = Arc<Entry>;

/// 内存订单注册表（构造注入，测试中每个用例独立实例）
#[derive(Default)]
pub struct OrderRegistry {
    orders: RwLock<HashMap<OrderId, Slot>>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建订单：在写锁内分配 ID 并插入，并发创建不会撞 ID
    pub async fn create(&self, submitter_id: UserId, display_name: String, text: String) -> Order {
        let mut orders = self.orders.write().await;
        let mut id = OrderId::generate();
        while orders.contains_key(&id) {
            id = OrderId::generate();
        }
        let order = Order::new(id.clone(), submitter_id, display_name, text);
        orders.insert(id, Arc::new(Entry::new(order.clone())));
        order
    }

    async fn slot(&self, id: &str) -> Result<Slot, OrderError> {
        self.orders
            .read()
            .await
            .get(&OrderId(id.to_string()))
            .cloned()
            .ok_or_else(|| OrderError::NotFound(id.to_string()))
    }

    /// 按 ID 读取快照
    pub async fn get(&self, id: &str) -> Result<Order, OrderError> {
        let slot = self.slot(id).await?;
        let order = slot.order.lock().await;
        Ok(order.clone())
    }

    /// 在订单锁内执行任意读-判-写，返回闭包结果
    pub async fn with_order<F, R>(&self, id: &str, f: F) -> Result<R, OrderError>
    where
        F: FnOnce(&mut Order) -> R,
    {
        let slot = self.slot(id).await?;
        let mut order = slot.order.lock().await;
        Ok(f(&mut order))
    }

    /// 修改订单并返回修改后的状态
    pub async fn update<F>(&self, id: &str, mutator: F) -> Result<Order, OrderError>
    where
        F: FnOnce(&mut Order),
    {
        self.with_order(id, |order| {
            mutator(order);
            order.clone()
        })
        .await
    }

    /// 写入管理员视图句柄（仅当尚未设置时生效），并标记首条视图已落定
    pub async fn attach_view(&self, id: &str, handle: ViewHandle) -> Result<bool, OrderError> {
        let slot = self.slot(id).await?;
        let attached = {
            let mut order = slot.order.lock().await;
            if order.operator_view.is_some() {
                false
            } else {
                order.operator_view = Some(handle);
                true
            }
        };
        slot.view_settled.send_replace(true);
        Ok(attached)
    }

    /// 首条视图发送失败：不写句柄，只放行等待者
    pub async fn settle_view(&self, id: &str) -> Result<(), OrderError> {
        let slot = self.slot(id).await?;
        slot.view_settled.send_replace(true);
        Ok(())
    }

    /// 等首条视图落定（最多 `timeout`），返回当前句柄
    pub async fn await_view(&self, id: &str, timeout: Duration) -> Result<Option<ViewHandle>, OrderError> {
        let slot = self.slot(id).await?;
        let mut settled = slot.view_settled.subscribe();
        let wait = async {
            while !*settled.borrow_and_update() {
                if settled.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            tracing::warn!(order_id = id, "Operator view still pending, giving up wait");
        }
        let handle = slot.order.lock().await.operator_view;
        Ok(handle)
    }

    /// 订单总数
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 各状态的订单数 (new, in_progress, done)
    pub async fn count_by_status(&self) -> (usize, usize, usize) {
        let slots: Vec<Slot> = self.orders.read().await.values().cloned().collect();
        let mut counts = (0, 0, 0);
        for slot in slots {
            match slot.order.lock().await.status {
                OrderStatus::New => counts.0 += 1,
                OrderStatus::InProgress => counts.1 += 1,
                OrderStatus::Done => counts.2 += 1,
            }
        }
        counts
    }
}
