//! 目标页面宿主
//!
//! 编排器通过 `SurfaceHost` 查找或创建目标页面、等待就绪、向页内 Agent 发送命令。
//! `LocalSurfaceHost` 在每个页面上挂一个 `ExtractionAgent`，页面本身由 `FeedFactory` 提供。

pub mod local;
#[cfg(feature = "browser")]
pub mod chrome;

pub use local::LocalSurfaceHost;
#[cfg(feature = "browser")]
pub use chrome::ChromeFeedFactory;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{ExtractError, FeedSurface};
use crate::channel::{AgentCommand, MessageResponse};
use crate::core::SyncError;

/// 页面 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SurfaceId(u64);

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceId {
    pub fn new() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// 编排器眼中的页面宿主
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// 查找地址以 locator 开头的已有页面，找到则切到前台
    async fn locate(&self, locator: &str) -> Option<SurfaceId>;

    /// 在 locator 处新建页面
    async fn create(&self, locator: &str) -> Result<SurfaceId, SyncError>;

    /// 等待页面加载完成，再留出页内 Agent 初始化时间
    async fn wait_ready(&self, id: SurfaceId) -> Result<(), SyncError>;

    /// 向页内 Agent 发送命令；不可达时返回失败应答
    async fn send(&self, id: SurfaceId, command: AgentCommand) -> MessageResponse;
}

/// 页面来源（浏览器标签页、测试桩等）
#[async_trait]
pub trait FeedFactory: Send + Sync {
    /// 查找宿主之外已经打开的匹配页面
    async fn find(&self, _locator: &str) -> Option<Arc<dyn FeedSurface>> {
        None
    }

    /// 打开新页面
    async fn open(&self, locator: &str) -> Result<Arc<dyn FeedSurface>, ExtractError>;
}
