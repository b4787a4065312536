//! 组装器：统一的同步运行时初始化逻辑
//!
//! 配置 + 存储 + 页面来源 → 上报通道、页面宿主、编排器，并启动上报 / 控制服务任务。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::agent::ExtractionSettings;
use crate::channel::{self, ControlRequest, Requester};
use crate::config::AppConfig;
use crate::core::{SyncError, SyncOrchestrator};
use crate::storage::{Repository, SqliteRepository};
use crate::surface::{FeedFactory, LocalSurfaceHost, SurfaceHost};

/// 上报 / 控制通道容量
const CHANNEL_CAPACITY: usize = 64;

/// 同步运行时构建器
pub struct SyncBuilder {
    config: AppConfig,
    repository: Option<Arc<dyn Repository>>,
    factory: Option<Arc<dyn FeedFactory>>,
}

impl SyncBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            repository: None,
            factory: None,
        }
    }

    /// 指定存储；未指定时打开配置中的 SQLite 文件
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// 指定页面来源；未指定时使用浏览器（feature "browser"）
    pub fn with_feed_factory(mut self, factory: Arc<dyn FeedFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    fn build_repository(&self) -> Result<Arc<dyn Repository>, SyncError> {
        match &self.repository {
            Some(repo) => Ok(Arc::clone(repo)),
            None => {
                let repo = SqliteRepository::open(&self.config.storage.path)?;
                tracing::info!(path = %self.config.storage.path.display(), "storage opened");
                Ok(Arc::new(repo))
            }
        }
    }

    fn build_factory(&self) -> Arc<dyn FeedFactory> {
        if let Some(factory) = &self.factory {
            return Arc::clone(factory);
        }
        #[cfg(feature = "browser")]
        return Arc::new(crate::surface::ChromeFeedFactory::new(&self.config.browser));
        #[cfg(not(feature = "browser"))]
        return Arc::new(NoBrowser);
    }

    /// 构建运行时；需在 tokio 运行时内调用
    pub fn build(self) -> Result<SyncRuntime, SyncError> {
        let repo = self.build_repository()?;
        let factory = self.build_factory();
        let sync = &self.config.sync;

        let (reports, report_inbox) = channel::channel(CHANNEL_CAPACITY, sync.command_timeout());
        let host = Arc::new(
            LocalSurfaceHost::new(factory, reports, ExtractionSettings::from(sync))
                .with_ready_settle(sync.ready_settle())
                .with_command_timeout(sync.command_timeout()),
        );

        let surfaces: Arc<dyn SurfaceHost> = host.clone();
        let orchestrator = Arc::new(
            SyncOrchestrator::new(repo, surfaces)
                .with_stored_handle(sync.handle.clone()),
        );
        let report_task = tokio::spawn(Arc::clone(&orchestrator).serve_reports(report_inbox));

        Ok(SyncRuntime {
            orchestrator,
            host,
            command_timeout: sync.command_timeout(),
            report_task,
        })
    }
}

/// 已启动的同步运行时
pub struct SyncRuntime {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub host: Arc<LocalSurfaceHost>,
    command_timeout: Duration,
    report_task: JoinHandle<()>,
}

impl SyncRuntime {
    /// 打开一条控制通道（弹窗 / CLI 一侧使用）
    pub fn control(&self) -> Requester<ControlRequest> {
        let (requester, inbox) = channel::channel(CHANNEL_CAPACITY, self.command_timeout);
        tokio::spawn(Arc::clone(&self.orchestrator).serve_control(inbox));
        requester
    }

    /// 停止上报服务任务
    pub fn shutdown(self) {
        self.report_task.abort();
    }
}

/// 未启用浏览器时的页面来源：任何打开请求都失败
#[cfg(not(feature = "browser"))]
struct NoBrowser;

#[cfg(not(feature = "browser"))]
#[async_trait::async_trait]
impl FeedFactory for NoBrowser {
    async fn open(
        &self,
        _locator: &str,
    ) -> Result<Arc<dyn crate::agent::FeedSurface>, crate::agent::ExtractError> {
        Err(crate::agent::ExtractError::Surface(
            "built without the \"browser\" feature".to_string(),
        ))
    }
}

/// 便捷函数：加载配置失败时回退默认值
pub fn create_sync_builder(config_path: Option<std::path::PathBuf>) -> SyncBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    SyncBuilder::new(config)
}
