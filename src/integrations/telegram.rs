//! Telegram Bot API 集成
//!
//! - `TelegramClient`：Bot API 的最小 HTTP 客户端，实现 `Notifier`
//! - `handle_update`：把一条 Update 路由到接单台
//! - `run_polling`：getUpdates 长轮询主循环，每条 Update 一个任务
//!
//! 所有消息使用 parse_mode=HTML 发送，用户原文由渲染层转义。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::config::{AppConfig, TelegramSection};
use crate::core::error::NotifyError;
use crate::core::lifecycle::Ack;
use crate::core::order::{SubmitterProfile, UserId, ViewHandle};
use crate::core::registry::OrderRegistry;
use crate::core::shutdown::ShutdownManager;
use crate::desk::OrderDesk;
use crate::notify::Notifier;
use crate::render::Keyboard;

/// 单次 429 等待上限（秒）
const MAX_RETRY_AFTER_SECS: u64 = 30;

// ---------- Bot API 类型（只保留用到的字段） ----------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl From<&User> for SubmitterProfile {
    fn from(u: &User) -> Self {
        SubmitterProfile {
            id: u.id,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            username: u.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a Keyboard>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    /// 空键盘即移除全部按钮
    reply_markup: Keyboard,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
    text: &'a str,
    show_alert: bool,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
    allowed_updates: [&'static str; 2],
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct BotInfo {
    pub id: i64,
    pub username: Option<String>,
}

const ALLOWED_UPDATES: [&str; 2] = ["message", "callback_query"];

// ---------- 客户端 ----------

/// Telegram Bot API 客户端
pub struct TelegramClient {
    http: reqwest::Client,
    /// `{api_base}/bot{token}`
    endpoint: String,
    timeout: Duration,
    max_attempts: u32,
    /// getMe 返回的机器人用户名，用于识别 `/start@<name>`
    username: OnceLock<String>,
}

impl TelegramClient {
    pub fn new(token: &str, settings: &TelegramSection) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", settings.api_base.trim_end_matches('/'), token),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            max_attempts: settings.max_attempts.max(1),
            username: OnceLock::new(),
        })
    }

    pub fn bot_username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// 调用一个 Bot API 方法；网络错误、非 JSON 的错误页与 429 在尝试次数内重试
    async fn call<B, T>(&self, method: &str, body: &B, timeout: Duration) -> Result<T, NotifyError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.endpoint, method);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= self.max_attempts;

            let parsed: ApiResponse<T> = match self.post(&url, body, timeout).await {
                Ok(parsed) => parsed,
                Err(e) if e.is_transient() && !last => {
                    tracing::debug!(method, attempt, "Telegram request failed, retrying: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if parsed.ok {
                return parsed
                    .result
                    .ok_or_else(|| NotifyError::Decode(format!("{}: ok without result", method)));
            }

            let code = parsed.error_code.unwrap_or_default();
            if code == 429 {
                let retry_after = parsed
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1);
                if last {
                    return Err(NotifyError::RateLimited { retry_after });
                }
                tracing::warn!(method, retry_after, "Rate limited by Telegram");
                tokio::time::sleep(Duration::from_secs(retry_after.min(MAX_RETRY_AFTER_SECS))).await;
                continue;
            }

            return Err(NotifyError::Api {
                code,
                description: parsed.description.unwrap_or_default(),
            });
        }
    }

    /// 发出一次请求并解析响应体
    async fn post<B, T>(&self, url: &str, body: &B, timeout: Duration) -> Result<ApiResponse<T>, NotifyError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.http.post(url).json(body).timeout(timeout).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        decode_response(status, &bytes)
    }

    /// 获取机器人信息并记住其用户名
    pub async fn get_me(&self) -> Result<BotInfo, NotifyError> {
        let me: BotInfo = self.call("getMe", &serde_json::json!({}), self.timeout).await?;
        if let Some(name) = &me.username {
            let _ = self.username.set(name.clone());
        }
        Ok(me)
    }

    /// 切换到长轮询前必须删除 webhook
    pub async fn delete_webhook(&self) -> Result<bool, NotifyError> {
        self.call("deleteWebhook", &serde_json::json!({}), self.timeout).await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<bool, NotifyError> {
        let req = SetWebhookRequest {
            url,
            secret_token,
            allowed_updates: ALLOWED_UPDATES,
        };
        self.call("setWebhook", &req, self.timeout).await
    }

    pub async fn get_updates(&self, offset: i64, poll_timeout: u64) -> Result<Vec<Update>, NotifyError> {
        let req = GetUpdatesRequest {
            offset,
            timeout: poll_timeout,
            allowed_updates: ALLOWED_UPDATES,
        };
        // HTTP 超时要比服务端挂起时间长
        let timeout = Duration::from_secs(poll_timeout) + self.timeout;
        self.call("getUpdates", &req, timeout).await
    }

    /// 给按下按钮的人一个私有回执
    pub async fn answer_callback(&self, callback_id: &str, ack: &Ack) -> Result<(), NotifyError> {
        let req = AnswerCallbackQueryRequest {
            callback_query_id: callback_id,
            text: &ack.text,
            show_alert: ack.alert,
        };
        self.call::<_, bool>("answerCallbackQuery", &req, self.timeout)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_message(
        &self,
        to: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<ViewHandle, NotifyError> {
        let req = SendMessageRequest {
            chat_id: to.0,
            text,
            parse_mode: "HTML",
            reply_markup: keyboard,
        };
        let sent: SentMessage = self.call("sendMessage", &req, self.timeout).await?;
        Ok(ViewHandle {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn edit_message(
        &self,
        handle: ViewHandle,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), NotifyError> {
        let req = EditMessageTextRequest {
            chat_id: handle.chat_id,
            message_id: handle.message_id,
            text,
            parse_mode: "HTML",
            reply_markup: keyboard.cloned().unwrap_or_default(),
        };
        match self
            .call::<_, serde_json::Value>("editMessageText", &req, self.timeout)
            .await
        {
            Err(NotifyError::Api { description, .. }) if is_not_modified(&description) => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

/// Bot API 的错误也以 JSON 返回（可能是 4xx）；只有非 2xx 且不是 JSON 时才视为 HTTP 层错误
fn decode_response<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    body: &[u8],
) -> Result<ApiResponse<T>, NotifyError> {
    serde_json::from_slice(body).map_err(|e| {
        if status.is_success() {
            NotifyError::Decode(e.to_string())
        } else {
            NotifyError::Http {
                status: status.as_u16(),
            }
        }
    })
}

/// 内容未变化的编辑不算失败
fn is_not_modified(description: &str) -> bool {
    description.contains("message is not modified")
}

/// 按配置组装客户端与接单台（两个二进制共用）
pub fn build_desk(cfg: &AppConfig) -> anyhow::Result<(Arc<OrderDesk>, Arc<TelegramClient>)> {
    let token = cfg.token()?;
    let operator = cfg.operator()?;
    let client = Arc::new(TelegramClient::new(token, &cfg.telegram)?);

    let audit = if cfg.audit.enabled {
        tracing::info!("Audit log: {}", cfg.audit.path.display());
        Some(AuditLog::new(cfg.audit.path.clone()))
    } else {
        None
    };

    let notifier: Arc<dyn Notifier> = client.clone();
    let desk = OrderDesk::new(Arc::new(OrderRegistry::new()), operator, notifier, audit);
    Ok((Arc::new(desk), client))
}

// ---------- 入站路由 ----------

/// 把一条 Update 交给接单台
pub async fn handle_update(desk: &OrderDesk, client: &TelegramClient, update: Update) {
    if let Some(query) = update.callback_query {
        let actor = UserId(query.from.id);
        let data = query.data.as_deref().unwrap_or_default();
        let decision = desk.on_button_press(actor, data).await;
        if let Err(e) = client.answer_callback(&query.id, &decision.ack).await {
            tracing::warn!(actor = %actor, "Failed to answer callback: {}", e);
        }
        return;
    }

    let Some(message) = update.message else {
        tracing::debug!(update_id = update.update_id, "Update without message, ignoring");
        return;
    };
    match route(&message, client.bot_username()) {
        Inbound::Start(sender) => desk.on_start(sender).await,
        Inbound::Order(profile, text) => {
            desk.on_text_message(&profile, text).await;
        }
        Inbound::NonText(sender) => desk.on_non_text_message(sender).await,
        Inbound::Ignore(reason) => {
            tracing::debug!(update_id = update.update_id, reason, "Message ignored");
        }
    }
}

/// 一条消息该如何处理
#[derive(Debug)]
enum Inbound<'a> {
    Start(UserId),
    Order(SubmitterProfile, &'a str),
    NonText(UserId),
    Ignore(&'static str),
}

/// 所有回复都发给发送者本人（与订单状态通知同一目标），而不是消息所在的聊天
fn route<'a>(message: &'a Message, bot_username: Option<&str>) -> Inbound<'a> {
    let Some(from) = message.from.as_ref() else {
        return Inbound::Ignore("no sender");
    };
    if from.is_bot {
        return Inbound::Ignore("sent by a bot");
    }
    let sender = UserId(from.id);
    match message.text.as_deref() {
        Some(text) => match start_command(text, bot_username) {
            StartCommand::Ours => Inbound::Start(sender),
            StartCommand::OtherBot => Inbound::Ignore("command for another bot"),
            StartCommand::None => Inbound::Order(SubmitterProfile::from(from), text),
        },
        None => Inbound::NonText(sender),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StartCommand {
    Ours,
    /// `/start@<其他机器人>`（群聊中常见）
    OtherBot,
    None,
}

/// `/start` 或 `/start@<本机器人>`，可带参数。用户名未知时不校验 `@` 后缀。
fn start_command(text: &str, bot_username: Option<&str>) -> StartCommand {
    let first = text.split_whitespace().next().unwrap_or_default();
    if first == "/start" {
        return StartCommand::Ours;
    }
    match (first.strip_prefix("/start@"), bot_username) {
        (None, _) => StartCommand::None,
        (Some(_), None) => StartCommand::Ours,
        (Some(target), Some(me)) if target.eq_ignore_ascii_case(me) => StartCommand::Ours,
        (Some(_), Some(_)) => StartCommand::OtherBot,
    }
}

/// getUpdates 长轮询，直到收到关闭信号
pub async fn run_polling(
    desk: Arc<OrderDesk>,
    client: Arc<TelegramClient>,
    shutdown: ShutdownManager,
    poll_timeout_secs: u64,
) -> anyhow::Result<()> {
    let me = client
        .get_me()
        .await
        .context("Failed to connect to Telegram (check bot token)")?;
    client
        .delete_webhook()
        .await
        .context("Failed to delete webhook before polling")?;

    tracing::info!(
        "Bot @{} started, operator {}. Waiting for messages...",
        me.username.as_deref().unwrap_or("?"),
        desk.operator()
    );

    let token = shutdown.token();
    let mut offset = 0i64;
    let mut backoff = Duration::from_secs(1);

    loop {
        let updates = tokio::select! {
            _ = token.cancelled() => break,
            res = client.get_updates(offset, poll_timeout_secs) => res,
        };

        match updates {
            Ok(updates) => {
                backoff = Duration::from_secs(1);
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let desk = Arc::clone(&desk);
                    let client = Arc::clone(&client);
                    shutdown.spawn(async move {
                        handle_update(&desk, &client, update).await;
                    });
                }
            }
            Err(e) => {
                tracing::warn!("getUpdates failed: {}, retrying in {}s", e, backoff.as_secs());
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
    }

    tracing::info!("Polling stopped");
    Ok(())
}
