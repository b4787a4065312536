//! 中断处理
//!
//! `gleaner sync` 前台等待同步结束；Ctrl+C 或 SIGTERM 时先停止同步再退出，
//! 使持久化状态落到 idle 而不是停留在 syncing。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::SyncOrchestrator;

/// 单个收尾步骤的时限
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// 中断来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 记录第一次中断请求并唤醒等待方
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求中断；重复请求保留最早的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|slot| *slot)
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping sync");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Ok(mut term) = signal(SignalKind::terminate()) {
                    term.recv().await;
                    tracing::info!("terminated, stopping sync");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 中断后需要执行的收尾步骤
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 依注册顺序执行收尾步骤
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    steps: Vec<Box<dyn ShutdownCleanup>>,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            steps: Vec::new(),
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, step: T) {
        self.steps.push(Box::new(step));
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }

    /// 单步失败或超时只记日志，后续步骤照常执行
    pub async fn run_cleanup(&self) {
        for step in &self.steps {
            let name = step.name();
            match tokio::time::timeout(CLEANUP_TIMEOUT, step.cleanup()).await {
                Ok(Ok(())) => tracing::debug!(step = name, "cleanup done"),
                Ok(Err(e)) => tracing::warn!(step = name, error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(
                    step = name,
                    timeout_secs = CLEANUP_TIMEOUT.as_secs(),
                    "cleanup timed out"
                ),
            }
        }
    }
}

/// 状态仍为 syncing 时停止同步
pub struct StopSyncCleanup {
    orchestrator: Arc<SyncOrchestrator>,
}

impl StopSyncCleanup {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for StopSyncCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if self.orchestrator.status().await?.is_syncing() {
            self.orchestrator.stop().await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stop_sync"
    }
}

/// 等待 `app` 结束或被中断，随后执行收尾；被中断时返回 None
pub async fn run_with_graceful_shutdown<F, T>(
    coordinator: &ShutdownCoordinator,
    app: F,
) -> Option<T>
where
    F: Future<Output = T>,
{
    let manager = Arc::clone(coordinator.manager());
    manager.install_signal_handlers();

    let result = tokio::select! {
        value = app => Some(value),
        _ = manager.wait_for_shutdown() => None,
    };

    coordinator.run_cleanup().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AgentCommand, MessageResponse};
    use crate::core::{SyncError, SyncSource, SyncState, SyncStatus};
    use crate::storage::{MemoryRepository, Repository};
    use crate::surface::{SurfaceHost, SurfaceId};

    #[tokio::test]
    async fn test_first_shutdown_reason_wins() {
        let manager = ShutdownManager::new();
        assert_eq!(manager.reason(), None);

        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.wait_for_shutdown().await;
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl SurfaceHost for Unreachable {
        async fn locate(&self, _locator: &str) -> Option<SurfaceId> {
            None
        }
        async fn create(&self, _locator: &str) -> Result<SurfaceId, SyncError> {
            Err(SyncError::Surface("unreachable".into()))
        }
        async fn wait_ready(&self, _id: SurfaceId) -> Result<(), SyncError> {
            Ok(())
        }
        async fn send(&self, _id: SurfaceId, _command: AgentCommand) -> MessageResponse {
            MessageResponse::failure("unreachable")
        }
    }

    #[tokio::test]
    async fn test_stop_sync_cleanup_halts_syncing_status() {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_status(SyncStatus::started(SyncSource::Bookmarks, 1))
            .await
            .unwrap();
        let orchestrator = Arc::new(SyncOrchestrator::new(repo.clone(), Arc::new(Unreachable)));

        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register(StopSyncCleanup::new(orchestrator));

        coordinator.manager().shutdown(ShutdownReason::UserInitiated);
        let result = run_with_graceful_shutdown(&coordinator, std::future::pending::<()>()).await;
        assert!(result.is_none());

        let status = repo.get_status().await.unwrap();
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_finished_app_still_runs_cleanup() {
        let repo = Arc::new(MemoryRepository::new());
        let orchestrator = Arc::new(SyncOrchestrator::new(repo.clone(), Arc::new(Unreachable)));
        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register(StopSyncCleanup::new(orchestrator));

        let result = run_with_graceful_shutdown(&coordinator, async { 7 }).await;
        assert_eq!(result, Some(7));
        // 未在同步时收尾不改动状态
        assert_eq!(repo.get_status().await.unwrap(), SyncStatus::default());
        assert_eq!(coordinator.manager().reason(), None);
    }
}
