//! Telegram Webhook 接入（axum）
//!
//! Telegram 在超时后会重投 Update，因此本模块解析后立即返回 200，处理放到后台任务。
//! 配置了 secret_token 时校验 `X-Telegram-Bot-Api-Secret-Token` 头。

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};

use super::telegram::{handle_update, TelegramClient, Update};
use crate::core::shutdown::ShutdownManager;
use crate::desk::OrderDesk;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Webhook 服务状态
pub struct WebhookState {
    pub desk: Arc<OrderDesk>,
    pub client: Arc<TelegramClient>,
    pub shutdown: ShutdownManager,
    pub secret_token: Option<String>,
}

/// 创建 Webhook 路由
pub fn create_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_receive))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /webhook - 接收 Telegram Update
async fn webhook_receive(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if !secret_matches(state.secret_token.as_deref(), &headers) {
        tracing::warn!("Webhook request with bad secret token rejected");
        return StatusCode::UNAUTHORIZED;
    }
    if state.shutdown.is_shutdown() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let desk = Arc::clone(&state.desk);
    let client = Arc::clone(&state.client);
    state.shutdown.spawn(async move {
        handle_update(&desk, &client, update).await;
    });
    StatusCode::OK
}

/// GET /health - 订单计数
async fn health(State(state): State<Arc<WebhookState>>) -> Json<serde_json::Value> {
    let (new, in_progress, done) = state.desk.registry().count_by_status().await;
    Json(serde_json::json!({
        "status": "ok",
        "orders": { "new": new, "in_progress": in_progress, "done": done }
    }))
}

fn secret_matches(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::TelegramSection;
    use crate::core::order::UserId;
    use crate::core::registry::OrderRegistry;
    use crate::notify::RecordingNotifier;

    fn state(secret: Option<&str>) -> Arc<WebhookState> {
        let registry = Arc::new(OrderRegistry::new());
        let desk = OrderDesk::new(registry, UserId(1000), Arc::new(RecordingNotifier::new()), None);
        // 未被调用的客户端，不会发出网络请求
        let client = TelegramClient::new("0:test", &TelegramSection::default()).unwrap();
        Arc::new(WebhookState {
            desk: Arc::new(desk),
            client: Arc::new(client),
            shutdown: ShutdownManager::new(),
            secret_token: secret.map(str::to_string),
        })
    }

    #[test]
    fn test_secret_matching() {
        let mut headers = HeaderMap::new();
        assert!(secret_matches(None, &headers));
        assert!(!secret_matches(Some("s3cret"), &headers));
        headers.insert(SECRET_HEADER, "s3cret".parse().unwrap());
        assert!(secret_matches(Some("s3cret"), &headers));
        assert!(!secret_matches(Some("other"), &headers));
    }

    #[tokio::test]
    async fn test_bad_secret_is_rejected() {
        let app = create_router(state(Some("s3cret")));
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(SECRET_HEADER, "wrong")
            .body(Body::from(r#"{"update_id": 1}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let app = create_router(state(None));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
