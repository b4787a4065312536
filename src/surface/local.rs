//! 进程内页面宿主：为每个页面挂载一个提取 Agent，并通过命令通道与之通信

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{FeedFactory, SurfaceHost, SurfaceId};
use crate::agent::{ExtractionAgent, ExtractionSettings, FeedSurface};
use crate::channel::{self, AgentCommand, AgentReport, MessageResponse, Requester};
use crate::core::{detect_source, SyncError};

struct AttachedSurface {
    feed: Arc<dyn FeedSurface>,
    commands: Requester<AgentCommand>,
    agent_task: JoinHandle<()>,
}

pub struct LocalSurfaceHost {
    factory: Arc<dyn FeedFactory>,
    reports: Requester<AgentReport>,
    settings: ExtractionSettings,
    ready_settle: Duration,
    command_timeout: Duration,
    surfaces: Mutex<HashMap<SurfaceId, AttachedSurface>>,
}

impl LocalSurfaceHost {
    pub fn new(
        factory: Arc<dyn FeedFactory>,
        reports: Requester<AgentReport>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            factory,
            reports,
            settings,
            ready_settle: Duration::from_millis(500),
            command_timeout: Duration::from_secs(30),
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    /// 设置就绪后的初始化等待
    pub fn with_ready_settle(mut self, settle: Duration) -> Self {
        self.ready_settle = settle;
        self
    }

    /// 设置命令往返超时
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// 已挂载的页面数
    pub async fn surface_count(&self) -> usize {
        self.surfaces.lock().await.len()
    }

    /// 卸载页面：关闭命令通道，页内正在运行的循环会在下一轮顶部退出
    pub async fn detach(&self, id: SurfaceId) -> bool {
        match self.surfaces.lock().await.remove(&id) {
            Some(surface) => {
                drop(surface.commands);
                tracing::debug!(surface = %id, "surface detached");
                true
            }
            None => false,
        }
    }

    async fn attach(&self, feed: Arc<dyn FeedSurface>) -> SurfaceId {
        let id = SurfaceId::new();
        let (commands, inbox) = channel::channel(16, self.command_timeout);
        let agent = Arc::new(ExtractionAgent::new(
            Arc::clone(&feed),
            self.reports.clone(),
            self.settings.clone(),
        ));
        let agent_task = tokio::spawn(agent.serve(inbox));

        let address = feed.address();
        tracing::debug!(
            surface = %id,
            address = %address,
            source = ?detect_source(&address),
            "surface attached"
        );
        self.surfaces.lock().await.insert(
            id,
            AttachedSurface {
                feed,
                commands,
                agent_task,
            },
        );
        id
    }

    async fn feed(&self, id: SurfaceId) -> Option<Arc<dyn FeedSurface>> {
        self.surfaces
            .lock()
            .await
            .get(&id)
            .map(|s| Arc::clone(&s.feed))
    }
}

#[async_trait]
impl SurfaceHost for LocalSurfaceHost {
    async fn locate(&self, locator: &str) -> Option<SurfaceId> {
        let attached = {
            let mut surfaces = self.surfaces.lock().await;
            // 页内 Agent 已退出的页面不再复用
            surfaces.retain(|_, s| !s.agent_task.is_finished());
            surfaces
                .iter()
                .find(|(_, s)| s.feed.address().starts_with(locator))
                .map(|(id, s)| (*id, Arc::clone(&s.feed)))
        };

        let (id, feed) = match attached {
            Some((id, feed)) => {
                tracing::info!(surface = %id, locator, "reusing existing surface");
                (id, feed)
            }
            None => {
                let feed = self.factory.find(locator).await?;
                let id = self.attach(Arc::clone(&feed)).await;
                tracing::info!(surface = %id, locator, "adopted open surface");
                (id, feed)
            }
        };

        if let Err(e) = feed.activate().await {
            tracing::warn!(surface = %id, error = %e, "failed to activate surface");
        }
        Some(id)
    }

    async fn create(&self, locator: &str) -> Result<SurfaceId, SyncError> {
        let feed = self
            .factory
            .open(locator)
            .await
            .map_err(|e| SyncError::Surface(e.to_string()))?;
        let id = self.attach(feed).await;
        tracing::info!(surface = %id, locator, "surface created");
        Ok(id)
    }

    async fn wait_ready(&self, id: SurfaceId) -> Result<(), SyncError> {
        let feed = self
            .feed(id)
            .await
            .ok_or_else(|| SyncError::Surface(format!("{} is not attached", id)))?;
        feed.wait_ready()
            .await
            .map_err(|e| SyncError::Surface(e.to_string()))?;
        tokio::time::sleep(self.ready_settle).await;
        Ok(())
    }

    async fn send(&self, id: SurfaceId, command: AgentCommand) -> MessageResponse {
        let commands = self
            .surfaces
            .lock()
            .await
            .get(&id)
            .map(|s| s.commands.clone());
        match commands {
            Some(commands) => commands.request(command).await,
            None => MessageResponse::failure(format!("No surface with id {}", id)),
        }
    }
}
