//! 记录型 Notifier（用于测试，无需网络）
//!
//! 记录所有成功的发送 / 编辑；可配置为全部失败、对指定用户失败或发送变慢。

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Notifier;
use crate::core::error::NotifyError;
use crate::core::order::{UserId, ViewHandle};
use crate::render::Keyboard;

/// 一次成功的出站操作
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message {
        to: UserId,
        text: String,
        keyboard: Option<Keyboard>,
        handle: ViewHandle,
    },
    Edit {
        handle: ViewHandle,
        text: String,
        keyboard: Option<Keyboard>,
    },
}

#[derive(Default)]
pub struct RecordingNotifier {
    log: Mutex<Vec<Sent>>,
    next_message_id: AtomicI64,
    fail_all: bool,
    unreachable: HashSet<i64>,
    send_delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// 所有操作都失败
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new()
        }
    }

    /// 向指定用户发送时失败（模拟用户屏蔽了机器人）
    pub fn unreachable(mut self, user: UserId) -> Self {
        self.unreachable.insert(user.0);
        self
    }

    /// 每次发送新消息前先等待（模拟慢网络）
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.log.lock().await.clone()
    }

    /// 发给某个用户的消息文本
    pub async fn messages_to(&self, user: UserId) -> Vec<String> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|s| match s {
                Sent::Message { to, text, .. } if *to == user => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn edits(&self) -> Vec<Sent> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|s| matches!(s, Sent::Edit { .. }))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(
        &self,
        to: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<ViewHandle, NotifyError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all || self.unreachable.contains(&to.0) {
            return Err(NotifyError::Api {
                code: 403,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        let handle = ViewHandle {
            chat_id: to.0,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        };
        self.log.lock().await.push(Sent::Message {
            to,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
            handle,
        });
        Ok(handle)
    }

    async fn edit_message(
        &self,
        handle: ViewHandle,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), NotifyError> {
        if self.fail_all {
            return Err(NotifyError::Network("connection reset".into()));
        }
        self.log.lock().await.push(Sent::Edit {
            handle,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }
}
