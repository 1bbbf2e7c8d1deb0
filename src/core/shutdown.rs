//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 触发 CancellationToken；反馈循环在两轮之间检查 token 并提前结束，
//! 随后 ShutdownCoordinator 依次执行清理任务（关闭全部工具服务器进程等）。
//! 清理超时需覆盖对端终止宽限期，否则强杀阶段会被截断。
//! 进行中的工具调用不会被强行中断：它要么完成，要么在对端流关闭时失败。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::mcp::ToolRouter;

/// 关闭信号管理器
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// 获取关闭 token（交给反馈循环在每轮之间检查）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        let mut current = self.reason.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_none() {
            *current = Some(reason);
        }
        drop(current);
        self.shutdown_token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, stopping after the current step...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, stopping after the current step...");
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

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理任务，每个任务有独立超时
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 终止宽限期之外再留出强杀与回收的余量
    pub fn for_peer_grace(grace: Duration) -> Self {
        Self::new().with_timeout(grace + Duration::from_secs(5))
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {:?}", name, self.timeout);
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭全部工具服务器：并发发送终止信号，单个失败不影响其余
pub struct RouterCleanup {
    router: Arc<ToolRouter>,
}

impl RouterCleanup {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self { router }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RouterCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let report = self.router.close().await;
        if report.failures.is_empty() {
            Ok(())
        } else {
            let names: Vec<String> = report.failures.iter().map(|f| f.peer.clone()).collect();
            Err(anyhow::anyhow!(
                "{} of {} peers failed to terminate cleanly: {}",
                report.failures.len(),
                report.attempted,
                names.join(", ")
            ))
        }
    }

    fn name(&self) -> &'static str {
        "ToolRouter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        assert_eq!(manager.reason(), None);
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::UserInitiated));
    }

    struct MockCleanup {
        called: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for MockCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.called.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "MockCleanup"
        }
    }

    struct FailingCleanup;

    #[async_trait::async_trait]
    impl ShutdownCleanup for FailingCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }

        fn name(&self) -> &'static str {
            "FailingCleanup"
        }
    }

    #[tokio::test]
    async fn test_failed_cleanup_does_not_skip_the_rest() {
        let mut coordinator = ShutdownCoordinator::new();

        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        coordinator.register(FailingCleanup);
        coordinator.register(MockCleanup { called: called.clone() });

        coordinator.run_cleanup().await;
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_cleanup_budget_covers_peer_grace() {
        let coordinator = ShutdownCoordinator::for_peer_grace(Duration::from_secs(5));
        assert!(coordinator.timeout > Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_router_cleanup_on_empty_router() {
        let router = Arc::new(ToolRouter::new(Default::default()));
        let cleanup = RouterCleanup::new(router);
        assert!(cleanup.cleanup().await.is_ok());
    }
}
