//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 后停止接收新事件，并给正在处理的事件一段时间完成（通知尽量送达）。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 传输层致命错误
    FatalError(String),
}

/// 关闭信号管理器 + 事件任务跟踪
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    reason: Arc<std::sync::Mutex<Option<ShutdownReason>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            reason: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// 获取关闭 token（轮询循环据此退出）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭；只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 每个入站事件一个任务；关闭时统一等待
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// 等待在途事件处理完成，超时则放弃
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!("Waiting for {} in-flight events...", pending);
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    "{} events still running after {}s, giving up",
                    self.tracker.len(),
                    timeout.as_secs()
                );
                false
            }
        }
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::FatalError("boom".into()));
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let manager = ShutdownManager::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        manager.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(manager.drain(Duration::from_secs(2)).await);
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let manager = ShutdownManager::new();
        manager.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(!manager.drain(Duration::from_millis(20)).await);
    }
}
