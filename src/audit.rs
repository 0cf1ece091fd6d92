//! 订单审计日志：每创建一个订单追加一行纯文本
//!
//! 只记录创建事件，状态变更不写入此文件。写失败由调用方记录日志后继续。

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::error::AuditError;
use crate::core::order::Order;

/// 追加写的审计文件
pub struct AuditLog {
    path: PathBuf,
    // 串行化追加，避免并发写入交错
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一行订单创建记录
    pub async fn record_created(&self, order: &Order) -> Result<(), AuditError> {
        let line = format_line(order);
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// `[YYYY-MM-DD HH:MM:SS] 名字 (ID: 42) — "原文"`，原文中的换行写成 `\n` 以保持一行一单
pub fn format_line(order: &Order) -> String {
    format!(
        "[{}] {} (ID: {}) — \"{}\"\n",
        order.created_at.format("%Y-%m-%d %H:%M:%S"),
        order.submitter_name,
        order.submitter_id,
        order.text.replace('\r', "").replace('\n', "\\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::order::{OrderId, UserId};
    use tempfile::TempDir;

    fn order(text: &str) -> Order {
        Order::new(OrderId("abcd1234".into()), UserId(42), "Alice".into(), text.into())
    }

    #[test]
    fn test_format_line() {
        let line = format_line(&order("Need 100 business cards"));
        assert!(line.starts_with('['));
        assert!(line.ends_with("Alice (ID: 42) — \"Need 100 business cards\"\n"));
    }

    #[test]
    fn test_multiline_text_stays_on_one_line() {
        let line = format_line(&order("line one\nline two"));
        assert_eq!(line.lines().count(), 1);
        assert!(line.contains("line one\\nline two"));
    }

    #[tokio::test]
    async fn test_record_appends_one_line_per_order() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("logs").join("orders.txt"));

        log.record_created(&order("first")).await.unwrap();
        log.record_created(&order("second")).await.unwrap();

        let content = fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"first\""));
        assert!(lines[1].contains("\"second\""));
    }

    #[tokio::test]
    async fn test_unwritable_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        // 目录本身不能当文件打开
        let log = AuditLog::new(dir.path());
        assert!(log.record_created(&order("x")).await.is_err());
    }
}
