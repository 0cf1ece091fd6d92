//! 接单台：传输层入站事件的处理入口
//!
//! 把文本消息变成订单、把按钮按下交给生命周期引擎，然后执行得到的意图。
//! 所有核心错误都在这里变成给操作者的私有回执，不向上传播。

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::core::lifecycle::{Decision, LifecycleEngine, Outcome};
use crate::core::order::{Order, SubmitterProfile, UserId};
use crate::core::registry::OrderRegistry;
use crate::notify::{self, Notifier};
use crate::render;

pub struct OrderDesk {
    engine: LifecycleEngine,
    notifier: Arc<dyn Notifier>,
    audit: Option<AuditLog>,
}

impl OrderDesk {
    pub fn new(
        registry: Arc<OrderRegistry>,
        operator: UserId,
        notifier: Arc<dyn Notifier>,
        audit: Option<AuditLog>,
    ) -> Self {
        Self {
            engine: LifecycleEngine::new(registry, operator),
            notifier,
            audit,
        }
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        self.engine.registry()
    }

    pub fn operator(&self) -> UserId {
        self.engine.operator()
    }

    /// /start 命令
    pub async fn on_start(&self, chat: UserId) {
        if let Err(e) = self.notifier.send_message(chat, render::GREETING, None).await {
            tracing::warn!(user_id = %chat, "Failed to send greeting: {}", e);
        }
    }

    /// 任意文本即一个订单
    pub async fn on_text_message(&self, profile: &SubmitterProfile, text: &str) -> Order {
        let order = self
            .registry()
            .create(profile.user_id(), profile.display_name(), text.to_string())
            .await;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record_created(&order).await {
                tracing::error!(path = %audit.path().display(), "{}", e);
            }
        }

        tracing::info!(
            order_id = %order.id,
            submitter = %order.submitter_name,
            submitter_id = %order.submitter_id,
            "New order"
        );

        let intents = self.engine.intake(&order);
        notify::dispatch(self.notifier.as_ref(), self.registry(), self.operator(), intents).await;
        order
    }

    /// 非文本消息（图片、贴纸等）只提示发文字
    pub async fn on_non_text_message(&self, from: UserId) {
        if let Err(e) = self.notifier.send_message(from, render::TEXT_ONLY, None).await {
            tracing::warn!(user_id = %from, "Failed to send text-only hint: {}", e);
        }
    }

    /// 按钮按下；返回的 Decision.ack 由传输层私下回给按下者
    pub async fn on_button_press(&self, actor: UserId, data: &str) -> Decision {
        let decision = self.engine.apply(actor, data).await;
        if let Outcome::Rejected(e) = &decision.outcome {
            tracing::info!(actor = %actor, data, "Button press rejected: {}", e);
        }
        if !decision.intents.is_empty() {
            notify::dispatch(
                self.notifier.as_ref(),
                self.registry(),
                self.operator(),
                decision.intents.clone(),
            )
            .await;
        }
        decision
    }
}
