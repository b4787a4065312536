//! 状态定义：采集记录与同步状态单例
//!
//! `SyncStatus` 只由编排器修改；持久化后，重启的编排器或旁观者都能读取最近一次状态。

use serde::{Deserialize, Serialize};

use crate::core::SyncSource;

/// 当前时间（毫秒时间戳）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 一条采集到的内容：以稳定 id 标识，其余字段为解析端拥有的不透明载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub source: SyncSource,
    /// 采集时间（毫秒）
    pub synced_at: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, source: SyncSource, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            source,
            synced_at: now_millis(),
            payload,
        }
    }
}

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Completed,
    Error,
}

/// 同步状态单例（整条替换，无字段级更新原语）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub source: SyncSource,
    pub total_extracted: u64,
    pub new_count: u64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

impl SyncStatus {
    /// 新一轮同步的初始状态
    pub fn started(source: SyncSource, now: i64) -> Self {
        Self {
            state: SyncState::Syncing,
            source,
            total_extracted: 0,
            new_count: 0,
            started_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.state == SyncState::Syncing
    }

    /// 累加一次进度上报
    pub fn record_progress(&mut self, extracted: usize, merged: usize) {
        self.total_extracted += extracted as u64;
        self.new_count += merged as u64;
    }

    pub fn complete(&mut self, now: i64) {
        self.state = SyncState::Completed;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>, now: i64) {
        self.state = SyncState::Error;
        self.error = Some(message.into());
        self.completed_at = Some(now);
    }

    /// 强制回到空闲（stop 使用，不论之前处于何种状态）
    pub fn halt(&mut self, now: i64) {
        self.state = SyncState::Idle;
        self.completed_at = Some(now);
    }
}
