//! Courier 长轮询服务
//!
//! 环境变量:
//! - BOT_TOKEN 或 COURIER__BOT__TOKEN: Telegram Bot 令牌
//! - ADMIN_ID 或 COURIER__BOT__OPERATOR_ID: 管理员数字 ID
//! - RUST_LOG: 日志级别（默认 info）
//!
//! 启动: cargo run --bin courier [-- path/to/config.toml]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use courier::config::load_config;
use courier::core::{ShutdownManager, ShutdownReason};
use courier::integrations::telegram::{build_desk, run_polling};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let (desk, client) = build_desk(&cfg)?;

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let result = run_polling(
        desk.clone(),
        client,
        shutdown.clone(),
        cfg.telegram.poll_timeout_secs,
    )
    .await;
    if let Err(e) = &result {
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    }

    shutdown
        .drain(Duration::from_secs(cfg.app.drain_timeout_secs))
        .await;
    let (new, in_progress, done) = desk.registry().count_by_status().await;
    tracing::info!(new, in_progress, done, reason = ?shutdown.reason(), "Courier stopped");

    result
}
