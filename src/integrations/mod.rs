//! 外部集成：Telegram Bot API（长轮询；Webhook 需 `webhook` feature 与公网 HTTPS 域名）

pub mod telegram;

#[cfg(feature = "webhook")]
pub mod webhook;
