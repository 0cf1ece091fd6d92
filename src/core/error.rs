//! 订单错误类型
//!
//! 所有核心错误都在处理入口被转换为只给操作者看的简短提示，不会成为进程级失败。

use thiserror::Error;

use super::lifecycle::Action;

/// 已授权但前置状态不满足的两种情形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// 订单已关闭（对 Done 的订单执行 accept）
    AlreadyClosed,
    /// 跳过了前一步（对 New 的订单执行 complete）
    NotAccepted,
}

/// 订单注册表与生命周期引擎的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// 未知或过期的订单 ID（也包括无法解析的按钮数据）
    #[error("Order not found: {0}")]
    NotFound(String),

    /// 操作者不是配置的管理员
    #[error("Only the operator may do this")]
    Unauthorized,

    #[error("Invalid transition {action:?} on order {order_id}: {kind:?}")]
    InvalidTransition {
        order_id: String,
        action: Action,
        kind: TransitionKind,
    },
}

/// 向传输层发送/编辑消息失败（记录日志后丢弃）
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// 非 2xx 且响应体不是 Bot API JSON（多为代理 / 网关错误页）
    #[error("HTTP {status} without API response")]
    Http { status: u16 },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl NotifyError {
    /// 在剩余尝试次数内可以重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Network(_) | NotifyError::Http { .. })
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NotifyError::Decode(e.to_string())
        } else {
            NotifyError::Network(e.to_string())
        }
    }
}

/// 审计文件写入失败
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit log write failed: {0}")]
    Io(#[from] std::io::Error),
}
