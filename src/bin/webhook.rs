//! Courier Webhook 服务
//!
//! 通过 Telegram Webhook 接收 Update（需公网 HTTPS，一般放在反向代理之后）。
//!
//! 环境变量:
//! - BOT_TOKEN / ADMIN_ID: 同长轮询版本
//! - COURIER__WEBHOOK__LISTEN: 监听地址（默认 0.0.0.0:8080）
//! - COURIER__WEBHOOK__PUBLIC_URL: 设置后启动时自动调用 setWebhook
//! - COURIER__WEBHOOK__SECRET_TOKEN: 请求头校验值
//!
//! 启动: cargo run --bin courier-webhook --features webhook

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use courier::config::load_config;
use courier::core::ShutdownManager;
use courier::integrations::telegram::build_desk;
use courier::integrations::webhook::{create_router, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let (desk, client) = build_desk(&cfg)?;

    let me = client
        .get_me()
        .await
        .context("Failed to connect to Telegram (check bot token)")?;
    if let Some(url) = cfg.webhook.public_url.as_deref() {
        client
            .set_webhook(url, cfg.webhook.secret_token.as_deref())
            .await
            .context("setWebhook failed")?;
        tracing::info!("Webhook registered: {}", url);
    }

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let state = Arc::new(WebhookState {
        desk: desk.clone(),
        client,
        shutdown: shutdown.clone(),
        secret_token: cfg.webhook.secret_token.clone(),
    });
    let app = create_router(state);

    let addr = cfg.webhook.listen;
    tracing::info!(
        "Bot @{} webhook server listening on http://{}",
        me.username.as_deref().unwrap_or("?"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
        .await?;

    shutdown
        .drain(Duration::from_secs(cfg.app.drain_timeout_secs))
        .await;
    tracing::info!(reason = ?shutdown.reason(), "Courier webhook stopped");
    Ok(())
}
