//! 会话监管：当前同步对应的目标页面
//!
//! 会话句柄只存在于编排器内存中（不持久化），用于把 stop 路由到正确的页面；
//! 编排器重启后句柄丢失，遗留的 Agent 会自行跑到自然结束。

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::SyncSource;
use crate::surface::SurfaceId;

/// 进行中的同步会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub surface: SurfaceId,
    pub source: SyncSource,
    /// 仅用于日志关联
    pub run_id: Uuid,
}

impl Session {
    pub fn new(surface: SurfaceId, source: SyncSource) -> Self {
        Self {
            surface,
            source,
            run_id: Uuid::new_v4(),
        }
    }
}

/// 同一时刻最多持有一个会话句柄
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    active: Mutex<Option<Session>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录新会话，返回被替换的旧句柄
    pub async fn track(&self, session: Session) -> Option<Session> {
        self.active.lock().await.replace(session)
    }

    pub async fn current(&self) -> Option<Session> {
        self.active.lock().await.clone()
    }

    /// 取走并清空当前句柄
    pub async fn release(&self) -> Option<Session> {
        self.active.lock().await.take()
    }
}
