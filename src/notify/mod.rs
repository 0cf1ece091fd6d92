//! 通知边界：发送 / 编辑消息，并执行生命周期引擎产生的意图
//!
//! 投递失败只记录日志，不回滚已提交的状态变更。

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::core::error::NotifyError;
use crate::core::lifecycle::Intent;
use crate::core::order::{OrderId, UserId, ViewHandle};
use crate::core::registry::OrderRegistry;
use crate::render::Keyboard;

pub use mock::{RecordingNotifier, Sent};

/// 传输层出站操作
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送一条新消息，返回其句柄（用于之后原地编辑）
    async fn send_message(
        &self,
        to: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<ViewHandle, NotifyError>;

    /// 原地编辑已发送的消息；keyboard 为 None 时移除全部按钮
    async fn edit_message(
        &self,
        handle: ViewHandle,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), NotifyError>;
}

/// 首条视图在途时，刷新视图最多等待的时间
const VIEW_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// 执行一组意图（并发），失败记录后丢弃。
///
/// 新发出的管理员视图会把句柄写回订单，之后的状态变更据此原地编辑。
pub async fn dispatch(
    notifier: &dyn Notifier,
    registry: &OrderRegistry,
    operator: UserId,
    intents: Vec<Intent>,
) {
    let tasks = intents
        .into_iter()
        .map(|intent| execute(notifier, registry, operator, intent));
    join_all(tasks).await;
}

async fn execute(notifier: &dyn Notifier, registry: &OrderRegistry, operator: UserId, intent: Intent) {
    match intent {
        Intent::SendDirect { to, text } => {
            if let Err(e) = notifier.send_message(to, &text, None).await {
                tracing::error!(user_id = %to, "Failed to notify user: {}", e);
            }
        }
        Intent::PostOperatorView {
            order_id,
            text,
            keyboard,
        } => {
            post_view(notifier, registry, operator, &order_id, &text, keyboard.as_ref()).await;
        }
        Intent::RenderOperatorView {
            order_id,
            handle,
            text,
            keyboard,
        } => {
            let handle = match handle {
                Some(handle) => Some(handle),
                None => registry
                    .await_view(order_id.as_str(), VIEW_SETTLE_TIMEOUT)
                    .await
                    .unwrap_or(None),
            };
            match handle {
                Some(handle) => {
                    if let Err(e) = notifier.edit_message(handle, &text, keyboard.as_ref()).await {
                        tracing::warn!(order_id = %order_id, "Failed to update operator view: {}", e);
                    }
                }
                // 首条视图没发出去：补发一条新的
                None => {
                    post_view(notifier, registry, operator, &order_id, &text, keyboard.as_ref()).await;
                }
            }
        }
    }
}

async fn post_view(
    notifier: &dyn Notifier,
    registry: &OrderRegistry,
    operator: UserId,
    order_id: &OrderId,
    text: &str,
    keyboard: Option<&Keyboard>,
) {
    let settled = match notifier.send_message(operator, text, keyboard).await {
        Ok(handle) => match registry.attach_view(order_id.as_str(), handle).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(order_id = %order_id, "Operator view already attached");
                Ok(())
            }
            Err(e) => Err(e),
        },
        Err(e) => {
            tracing::error!(order_id = %order_id, "Failed to notify operator: {}", e);
            registry.settle_view(order_id.as_str()).await
        }
    };
    if let Err(e) = settled {
        tracing::warn!(order_id = %order_id, "Cannot attach view: {}", e);
    }
}
