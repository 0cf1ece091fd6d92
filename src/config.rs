//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COURIER__*` 覆盖（双下划线表示嵌套，如 `COURIER__BOT__OPERATOR_ID=42`）。
//! 兼容部署平台常用的 `BOT_TOKEN` / `ADMIN_ID`，仅在对应键未配置时生效。

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::order::UserId;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub bot: BotSection,
    pub telegram: TelegramSection,
    pub audit: AuditSection,
    pub webhook: WebhookSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 关闭时等待在途事件的秒数
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

fn default_drain_timeout_secs() -> u64 {
    10
}

/// [bot] 段：凭据与唯一管理员
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BotSection {
    pub token: Option<String>,
    /// 管理员的 Telegram 数字 ID
    pub operator_id: Option<i64>,
}

/// [telegram] 段：Bot API 地址、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// 单次出站请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 每条通知的最大尝试次数（1 = 只尝试一次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// getUpdates 长轮询等待秒数
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    1
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// [audit] 段：订单审计文件
#[derive(Debug, Clone, Deserialize)]
pub struct AuditSection {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: default_audit_path(),
        }
    }
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("orders.txt")
}

/// [webhook] 段（courier-webhook 使用）
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSection {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// 公网 HTTPS 地址（含路径），设置后启动时自动调用 setWebhook
    pub public_url: Option<String>,
    /// X-Telegram-Bot-Api-Secret-Token 校验值
    pub secret_token: Option<String>,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_url: None,
            secret_token: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl AppConfig {
    /// Bot 令牌（必填）
    pub fn token(&self) -> Result<&str, config::ConfigError> {
        self.bot
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                config::ConfigError::Message(
                    "bot.token is not set (COURIER__BOT__TOKEN or BOT_TOKEN)".into(),
                )
            })
    }

    /// 管理员身份（必填）
    pub fn operator(&self) -> Result<UserId, config::ConfigError> {
        self.bot.operator_id.map(UserId).ok_or_else(|| {
            config::ConfigError::Message(
                "bot.operator_id is not set (COURIER__BOT__OPERATOR_ID or ADMIN_ID)".into(),
            )
        })
    }

    /// 用 BOT_TOKEN / ADMIN_ID 补齐缺失的键
    fn apply_legacy_env(&mut self, token: Option<String>, admin_id: Option<String>) -> Result<(), config::ConfigError> {
        if self.bot.token.is_none() {
            self.bot.token = token;
        }
        if self.bot.operator_id.is_none() {
            if let Some(raw) = admin_id {
                let id = raw.trim().parse::<i64>().map_err(|_| {
                    config::ConfigError::Message(format!("ADMIN_ID is not a numeric id: {:?}", raw))
                })?;
                self.bot.operator_id = Some(id);
            }
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 COURIER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 COURIER__*（双下划线表示嵌套键）
/// 4. 最后用 BOT_TOKEN / ADMIN_ID 补齐未设置的凭据
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COURIER")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_legacy_env(std::env::var("BOT_TOKEN").ok(), std::env::var("ADMIN_ID").ok())?;
    Ok(cfg)
}
