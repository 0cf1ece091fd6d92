//! 订单生命周期引擎
//!
//! 状态机：New → InProgress → Done，单向且不可回退。
//!
//! 按钮处理顺序：
//! 1. 解析按钮数据（纯字符串操作，不读状态）；状态指示按钮直接回执
//! 2. 身份校验：非管理员一律回 Unauthorized，不读取任何订单，避免泄露订单是否存在
//! 3. 无法解析的数据按 NotFound 处理
//! 4. 在订单锁内完成「读 - 判断 - 写」，锁外生成副作用意图
//!
//! 重复按下已生效的动作只回执，不重复通知提交者、不重复渲染视图。

use std::sync::Arc;

use super::error::{OrderError, TransitionKind};
use super::order::{Order, OrderId, OrderStatus, UserId, ViewHandle};
use super::registry::OrderRegistry;
use crate::render::{self, Keyboard};

/// 管理员可执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Complete,
}

/// 按钮携带的动作令牌：`accept:<id>`、`complete:<id>`、`noop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionToken {
    Accept(OrderId),
    Complete(OrderId),
    /// 状态指示按钮，不改变任何状态
    Indicator,
}

impl ActionToken {
    /// 防御式解析；未知前缀或空 ID 返回 None
    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();
        if data == "noop" {
            return Some(ActionToken::Indicator);
        }
        let (kind, id) = data.split_once(':')?;
        let id = id.trim();
        if kind == "noop" {
            return Some(ActionToken::Indicator);
        }
        if id.is_empty() || id.len() > 64 {
            return None;
        }
        let id = OrderId(id.to_string());
        match kind {
            "accept" => Some(ActionToken::Accept(id)),
            // 旧版键盘使用 done:<id>
            "complete" | "done" => Some(ActionToken::Complete(id)),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ActionToken::Accept(id) => format!("accept:{}", id),
            ActionToken::Complete(id) => format!("complete:{}", id),
            ActionToken::Indicator => "noop".to_string(),
        }
    }
}

/// 状态变更产生的副作用意图，由 Notifier 执行
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// 给某个用户发一条消息
    SendDirect { to: UserId, text: String },
    /// 新订单：向管理员发出视图，并把返回的句柄写回订单
    PostOperatorView {
        order_id: OrderId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    /// 状态变更后刷新管理员视图。
    ///
    /// handle 是锁内快照；首条视图可能仍在发送中，执行时以注册表中的句柄为准，
    /// 首发失败时才另发一条。
    RenderOperatorView {
        order_id: OrderId,
        handle: Option<ViewHandle>,
        text: String,
        keyboard: Option<Keyboard>,
    },
}

/// 仅按下者可见的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub text: String,
    /// 是否弹窗（Telegram show_alert）
    pub alert: bool,
}

impl Ack {
    fn toast(text: &str) -> Self {
        Self {
            text: text.to_string(),
            alert: false,
        }
    }

    fn alert(text: &str) -> Self {
        Self {
            text: text.to_string(),
            alert: true,
        }
    }
}

/// 按钮处理的结果分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Transitioned {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// 目标状态已达成，幂等回执
    AlreadyApplied {
        order_id: OrderId,
        status: OrderStatus,
    },
    Indicator,
    Rejected(OrderError),
}

/// 一次按钮处理的完整决定
#[derive(Debug, Clone)]
pub struct Decision {
    pub outcome: Outcome,
    pub ack: Ack,
    pub intents: Vec<Intent>,
}

impl Decision {
    fn rejected(err: OrderError) -> Self {
        let ack = match &err {
            OrderError::Unauthorized => Ack::alert(render::ACK_OPERATOR_ONLY),
            OrderError::NotFound(_) => Ack::alert(render::ACK_NOT_FOUND),
            OrderError::InvalidTransition { kind, .. } => match kind {
                TransitionKind::AlreadyClosed => Ack::alert(render::ACK_ALREADY_CLOSED),
                TransitionKind::NotAccepted => Ack::alert(render::ACK_ACCEPT_FIRST),
            },
        };
        Self {
            outcome: Outcome::Rejected(err),
            ack,
            intents: Vec::new(),
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(self.outcome, Outcome::Transitioned { .. })
    }
}

/// 锁内判定结果
enum Step {
    Applied(Order, OrderStatus),
    Noop(OrderStatus),
    Invalid(TransitionKind),
}

/// 生命周期引擎：持有注册表与唯一管理员身份
pub struct LifecycleEngine {
    registry: Arc<OrderRegistry>,
    operator: UserId,
}

impl LifecycleEngine {
    pub fn new(registry: Arc<OrderRegistry>, operator: UserId) -> Self {
        Self { registry, operator }
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub fn operator(&self) -> UserId {
        self.operator
    }

    /// 新订单的意图：回复提交者 + 向管理员发送视图
    pub fn intake(&self, order: &Order) -> Vec<Intent> {
        vec![
            Intent::SendDirect {
                to: order.submitter_id,
                text: render::ORDER_RECEIVED.to_string(),
            },
            Intent::PostOperatorView {
                order_id: order.id.clone(),
                text: render::operator_view(order),
                keyboard: render::keyboard_for(order),
            },
        ]
    }

    /// 处理一次按钮按下
    pub async fn apply(&self, actor: UserId, data: &str) -> Decision {
        let token = ActionToken::parse(data);

        if token == Some(ActionToken::Indicator) {
            return Decision {
                outcome: Outcome::Indicator,
                ack: Ack::toast(render::ACK_INDICATOR),
                intents: Vec::new(),
            };
        }

        if actor != self.operator {
            tracing::warn!(actor = %actor, "Button press from non-operator rejected");
            return Decision::rejected(OrderError::Unauthorized);
        }

        let (action, id) = match token {
            Some(ActionToken::Accept(id)) => (Action::Accept, id),
            Some(ActionToken::Complete(id)) => (Action::Complete, id),
            _ => {
                tracing::debug!(data, "Malformed action token");
                return Decision::rejected(OrderError::NotFound(data.to_string()));
            }
        };

        let step = self
            .registry
            .with_order(id.as_str(), |order| Self::step(order, action))
            .await;

        match step {
            Err(e) => Decision::rejected(e),
            Ok(Step::Invalid(kind)) => Decision::rejected(OrderError::InvalidTransition {
                order_id: id.to_string(),
                action,
                kind,
            }),
            Ok(Step::Noop(status)) => Decision {
                outcome: Outcome::AlreadyApplied {
                    order_id: id,
                    status,
                },
                ack: Ack::toast(match action {
                    Action::Accept => render::ACK_ALREADY_IN_PROGRESS,
                    Action::Complete => render::ACK_ALREADY_DONE,
                }),
                intents: Vec::new(),
            },
            Ok(Step::Applied(order, from)) => {
                tracing::info!(
                    order_id = %order.id,
                    from = %from,
                    to = %order.status,
                    "Order transitioned"
                );
                self.transitioned(order, from, action)
            }
        }
    }

    /// 锁内：校验前置状态并推进
    fn step(order: &mut Order, action: Action) -> Step {
        let from = order.status;
        let next = match (action, from) {
            (Action::Accept, OrderStatus::New) => OrderStatus::InProgress,
            (Action::Accept, OrderStatus::InProgress) => return Step::Noop(from),
            (Action::Accept, OrderStatus::Done) => return Step::Invalid(TransitionKind::AlreadyClosed),
            (Action::Complete, OrderStatus::InProgress) => OrderStatus::Done,
            (Action::Complete, OrderStatus::Done) => return Step::Noop(from),
            (Action::Complete, OrderStatus::New) => return Step::Invalid(TransitionKind::NotAccepted),
        };
        debug_assert!(next.ordinal() > from.ordinal());
        order.status = next;
        Step::Applied(order.clone(), from)
    }

    fn transitioned(&self, order: Order, from: OrderStatus, action: Action) -> Decision {
        let (notice, ack) = match action {
            Action::Accept => (render::ORDER_ACCEPTED, render::ACK_ACCEPTED),
            Action::Complete => (render::ORDER_COMPLETED, render::ACK_COMPLETED),
        };
        let intents = vec![
            Intent::RenderOperatorView {
                order_id: order.id.clone(),
                handle: order.operator_view,
                text: render::operator_view(&order),
                keyboard: render::keyboard_for(&order),
            },
            Intent::SendDirect {
                to: order.submitter_id,
                text: notice.to_string(),
            },
        ];
        Decision {
            outcome: Outcome::Transitioned {
                order_id: order.id,
                from,
                to: order.status,
            },
            ack: Ack::toast(ack),
            intents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPERATOR: UserId = UserId(1000);

    async fn engine_with_order() -> (LifecycleEngine, OrderId) {
        let registry = Arc::new(OrderRegistry::new());
        let order = registry
            .create(UserId(42), "Alice".into(), "Need 100 business cards".into())
            .await;
        (LifecycleEngine::new(registry, OPERATOR), order.id)
    }

    fn notices_to(decision: &Decision, user: UserId) -> usize {
        decision
            .intents
            .iter()
            .filter(|i| matches!(i, Intent::SendDirect { to, .. } if *to == user))
            .count()
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(
            ActionToken::parse("accept:abc"),
            Some(ActionToken::Accept(OrderId("abc".into())))
        );
        assert_eq!(
            ActionToken::parse("complete:abc"),
            Some(ActionToken::Complete(OrderId("abc".into())))
        );
        assert_eq!(
            ActionToken::parse("done:abc"),
            Some(ActionToken::Complete(OrderId("abc".into())))
        );
        assert_eq!(ActionToken::parse("noop"), Some(ActionToken::Indicator));
        assert_eq!(ActionToken::parse("noop:abc"), Some(ActionToken::Indicator));
        assert_eq!(ActionToken::parse(""), None);
        assert_eq!(ActionToken::parse("accept:"), None);
        assert_eq!(ActionToken::parse("reopen:abc"), None);
        assert_eq!(ActionToken::parse("garbage"), None);
    }

    #[test]
    fn test_encode_parse_agree() {
        let token = ActionToken::Complete(OrderId("1a2b3c4d".into()));
        assert_eq!(ActionToken::parse(&token.encode()), Some(token));
    }

    #[tokio::test]
    async fn test_accept_then_complete() {
        let (engine, id) = engine_with_order().await;

        let d = engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        assert!(d.is_transition());
        assert_eq!(notices_to(&d, UserId(42)), 1);
        assert!(!d.ack.alert);

        let d = engine.apply(OPERATOR, &format!("complete:{}", id)).await;
        assert_eq!(
            d.outcome,
            Outcome::Transitioned {
                order_id: id.clone(),
                from: OrderStatus::InProgress,
                to: OrderStatus::Done
            }
        );
        let view = d
            .intents
            .iter()
            .find_map(|i| match i {
                Intent::RenderOperatorView { keyboard, .. } => Some(keyboard.clone()),
                _ => None,
            })
            .unwrap();
        assert!(view.is_none());

        let stored = engine.registry().get(id.as_str()).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Done);
    }

    #[tokio::test]
    async fn test_repeated_accept_is_idempotent() {
        let (engine, id) = engine_with_order().await;
        engine.apply(OPERATOR, &format!("accept:{}", id)).await;

        let d = engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        assert!(matches!(d.outcome, Outcome::AlreadyApplied { status: OrderStatus::InProgress, .. }));
        assert!(d.intents.is_empty());
        assert!(!d.ack.alert);
    }

    #[tokio::test]
    async fn test_repeated_complete_is_idempotent() {
        let (engine, id) = engine_with_order().await;
        engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        engine.apply(OPERATOR, &format!("complete:{}", id)).await;

        let d = engine.apply(OPERATOR, &format!("complete:{}", id)).await;
        assert!(matches!(d.outcome, Outcome::AlreadyApplied { status: OrderStatus::Done, .. }));
        assert!(d.intents.is_empty());
    }

    #[tokio::test]
    async fn test_complete_before_accept_is_rejected() {
        let (engine, id) = engine_with_order().await;
        let d = engine.apply(OPERATOR, &format!("complete:{}", id)).await;
        assert!(matches!(
            d.outcome,
            Outcome::Rejected(OrderError::InvalidTransition {
                kind: TransitionKind::NotAccepted,
                ..
            })
        ));
        assert!(d.intents.is_empty());
        assert_eq!(d.ack.text, render::ACK_ACCEPT_FIRST);
        let stored = engine.registry().get(id.as_str()).await.unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_accept_after_close_is_rejected() {
        let (engine, id) = engine_with_order().await;
        engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        engine.apply(OPERATOR, &format!("complete:{}", id)).await;

        let d = engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        assert!(matches!(
            d.outcome,
            Outcome::Rejected(OrderError::InvalidTransition {
                kind: TransitionKind::AlreadyClosed,
                ..
            })
        ));
        let stored = engine.registry().get(id.as_str()).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Done);
    }

    #[tokio::test]
    async fn test_non_operator_never_changes_state() {
        let (engine, id) = engine_with_order().await;
        for data in [
            format!("accept:{}", id),
            format!("complete:{}", id),
            "accept:ffffffff".to_string(),
            "garbage".to_string(),
        ] {
            let d = engine.apply(UserId(99), &data).await;
            assert_eq!(d.outcome, Outcome::Rejected(OrderError::Unauthorized));
            assert_eq!(d.ack.text, render::ACK_OPERATOR_ONLY);
            assert!(d.intents.is_empty());
        }
        let stored = engine.registry().get(id.as_str()).await.unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    async fn assert_outsider_cannot_move(engine: &LifecycleEngine, id: &OrderId, expected: OrderStatus) {
        for data in [format!("accept:{}", id), format!("complete:{}", id), format!("done:{}", id)] {
            let d = engine.apply(UserId(99), &data).await;
            assert_eq!(d.outcome, Outcome::Rejected(OrderError::Unauthorized));
            assert!(d.ack.alert);
            assert!(d.intents.is_empty());
        }
        let stored = engine.registry().get(id.as_str()).await.unwrap();
        assert_eq!(stored.status, expected);
    }

    #[tokio::test]
    async fn test_non_operator_cannot_complete_in_progress_order() {
        let (engine, id) = engine_with_order().await;
        engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        assert_outsider_cannot_move(&engine, &id, OrderStatus::InProgress).await;

        // 管理员仍可正常完成
        let d = engine.apply(OPERATOR, &format!("complete:{}", id)).await;
        assert!(d.is_transition());
    }

    #[tokio::test]
    async fn test_non_operator_cannot_touch_closed_order() {
        let (engine, id) = engine_with_order().await;
        engine.apply(OPERATOR, &format!("accept:{}", id)).await;
        engine.apply(OPERATOR, &format!("complete:{}", id)).await;
        assert_outsider_cannot_move(&engine, &id, OrderStatus::Done).await;
    }

    #[test]
    fn test_intake_posts_view_without_handle() {
        let registry = Arc::new(OrderRegistry::new());
        let engine = LifecycleEngine::new(registry, OPERATOR);
        let order = Order::new(OrderId("abcd1234".into()), UserId(42), "Alice".into(), "cards".into());
        let intents = engine.intake(&order);
        assert_eq!(intents.len(), 2);
        assert!(matches!(&intents[1], Intent::PostOperatorView { order_id, keyboard: Some(_), .. } if *order_id == order.id));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens_are_not_found() {
        let (engine, _) = engine_with_order().await;
        let d = engine.apply(OPERATOR, "accept:ffffffff").await;
        assert_eq!(
            d.outcome,
            Outcome::Rejected(OrderError::NotFound("ffffffff".into()))
        );
        let d = engine.apply(OPERATOR, "explode:now").await;
        assert!(matches!(d.outcome, Outcome::Rejected(OrderError::NotFound(_))));
        assert_eq!(d.ack.text, render::ACK_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_indicator_is_pure_ack() {
        let (engine, _) = engine_with_order().await;
        let d = engine.apply(UserId(99), "noop").await;
        assert_eq!(d.outcome, Outcome::Indicator);
        assert!(d.intents.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_accepts_transition_once() {
        let (engine, id) = engine_with_order().await;
        let engine = Arc::new(engine);
        let data = format!("accept:{}", id);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = Arc::clone(&engine);
            let data = data.clone();
            handles.push(tokio::spawn(async move { engine.apply(OPERATOR, &data).await }));
        }

        let mut transitions = 0;
        let mut notices = 0;
        for h in handles {
            let d = h.await.unwrap();
            if d.is_transition() {
                transitions += 1;
            } else {
                assert!(matches!(d.outcome, Outcome::AlreadyApplied { .. }));
            }
            notices += notices_to(&d, UserId(42));
        }
        assert_eq!(transitions, 1);
        assert_eq!(notices, 1);
    }
}
