//! 订单实体与值对象
//!
//! 订单是唯一的实体：提交者、显示名快照、原文、状态、管理员视图句柄。

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 订单 ID（8 位十六进制，进程生命周期内唯一）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    /// 从 v4 UUID 截取前 8 位生成候选 ID（唯一性由注册表保证）
    pub fn generate() -> Self {
        let full = uuid::Uuid::new_v4().simple().to_string();
        Self(full[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 聊天网络中的用户身份（Telegram 数字 ID）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 订单状态：只能 New → InProgress → Done 单向推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    InProgress,
    Done,
}

impl OrderStatus {
    /// 单向推进的序号，用于断言不可回退
    pub fn ordinal(self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::InProgress => 1,
            OrderStatus::Done => 2,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "new"),
            OrderStatus::InProgress => write!(f, "in_progress"),
            OrderStatus::Done => write!(f, "done"),
        }
    }
}

/// 管理员视图句柄：Telegram 中即 (chat_id, message_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// 提交者资料（来自传输层，用于计算显示名）
#[derive(Debug, Clone, Default)]
pub struct SubmitterProfile {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl SubmitterProfile {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn user_id(&self) -> UserId {
        UserId(self.id)
    }

    /// 显示名：姓 + 名 → @username → id<数字>
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return name;
        }
        match self.username.as_deref().map(str::trim) {
            Some(handle) if !handle.is_empty() => format!("@{}", handle),
            _ => format!("id{}", self.id),
        }
    }
}

/// 订单
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub submitter_id: UserId,
    /// 创建时计算的显示名快照，之后不再重新推导
    pub submitter_name: String,
    /// 原文，逐字保存；渲染层负责转义
    pub text: String,
    pub status: OrderStatus,
    /// 首次通知管理员成功后写入，至多一次
    pub operator_view: Option<ViewHandle>,
    pub created_at: DateTime<Local>,
}

impl Order {
    pub fn new(id: OrderId, submitter_id: UserId, submitter_name: String, text: String) -> Self {
        Self {
            id,
            submitter_id,
            submitter_name,
            text,
            status: OrderStatus::New,
            operator_view: None,
            created_at: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback_chain() {
        let mut p = SubmitterProfile::new(42);
        p.first_name = Some("Alice".into());
        p.last_name = Some("Smith".into());
        p.username = Some("alice".into());
        assert_eq!(p.display_name(), "Alice Smith");

        p.last_name = None;
        assert_eq!(p.display_name(), "Alice");

        p.first_name = Some("  ".into());
        assert_eq!(p.display_name(), "@alice");

        p.username = None;
        assert_eq!(p.display_name(), "id42");
    }

    #[test]
    fn test_last_name_only() {
        let mut p = SubmitterProfile::new(7);
        p.last_name = Some("Ivanova".into());
        assert_eq!(p.display_name(), "Ivanova");
    }

    #[test]
    fn test_generated_id_shape() {
        let id = OrderId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_status_ordinal_is_monotonic() {
        assert!(OrderStatus::New.ordinal() < OrderStatus::InProgress.ordinal());
        assert!(OrderStatus::InProgress.ordinal() < OrderStatus::Done.ordinal());
    }
}
