//! 优雅关闭
//!
//! 统一的关闭信号监听和清理逻辑：
//! - Ctrl+C / SIGTERM 触发 CancellationToken
//! - 清理任务按注册顺序执行，每个任务有超时
//! - 中继服务关闭时取消所有过期定时器，剩余执行写入历史

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use super::service::RelayService;

/// 关闭信号管理器；只记录第一次触发的原因
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// 用户发起的退出 (Ctrl+C)
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 输入流结束
    InputClosed,
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.shutdown_token.cancel();
    }

    /// 触发关闭的原因；未关闭时为 None
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
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

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：管理多个清理任务
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 每个清理任务的超时（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 执行所有清理任务
    pub async fn run_cleanup(&self) {
        tracing::info!(
            reason = ?self.manager.reason(),
            "Running {} cleanup tasks...",
            self.cleanup_tasks.len()
        );

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

/// 中继服务清理：关闭执行注册表并 flush 历史
pub struct RelayCleanup {
    service: Arc<RelayService>,
}

impl RelayCleanup {
    pub fn new(service: Arc<RelayService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RelayCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let evicted = self.service.shutdown().await;
        tracing::info!("Relay shut down, {} active executions evicted", evicted);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Relay"
    }
}

/// 运行主应用直到结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("Application finished normally");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!(reason = ?shutdown_manager.reason(), "Shutdown signal received");
        }
    }

    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        assert_eq!(manager.reason(), None);
        manager.shutdown(ShutdownReason::InputClosed);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[test]
    fn test_first_shutdown_reason_wins() {
        let manager = ShutdownManager::new();
        manager.shutdown(ShutdownReason::FatalError("stdin broken".to_string()));
        manager.shutdown(ShutdownReason::InputClosed);
        assert_eq!(
            manager.reason(),
            Some(ShutdownReason::FatalError("stdin broken".to_string()))
        );
    }

    #[tokio::test]
    async fn test_run_with_graceful_shutdown_runs_cleanup_after_app() {
        let manager = Arc::new(ShutdownManager::new());
        let cleaned = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let app = {
            let manager = Arc::clone(&manager);
            async move { manager.shutdown(ShutdownReason::InputClosed) }
        };
        let flag = cleaned.clone();
        run_with_graceful_shutdown(Arc::clone(&manager), app, move || async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .await;

        assert!(cleaned.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(manager.reason(), Some(ShutdownReason::InputClosed));
    }

    struct StuckCleanup;

    #[async_trait::async_trait]
    impl ShutdownCleanup for StuckCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Stuck"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_cleanup_times_out_and_later_tasks_still_run() {
        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        coordinator.register(StuckCleanup);
        coordinator.register(MockCleanup { called: called.clone() });

        coordinator.run_cleanup().await;
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    struct MockCleanup {
        called: Arc<std::sync::atomic::AtomicBool>,
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

    #[tokio::test]
    async fn test_shutdown_coordinator_runs_tasks() {
        let manager = Arc::new(ShutdownManager::new());
        let mut coordinator = ShutdownCoordinator::new(manager);

        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        coordinator.register(MockCleanup { called: called.clone() });

        coordinator.run_cleanup().await;
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_relay_cleanup_closes_registry() {
        let service = Arc::new(RelayService::start(AppConfig::default()).unwrap());
        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register(RelayCleanup::new(service.clone()));

        coordinator.run_cleanup().await;
        assert!(service.executions().is_closed().await);
    }
}
