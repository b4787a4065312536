//! 消息协议定义
//!
//! 编排器 → Agent 的命令、Agent → 编排器的上报、控制端 → 编排器的请求，
//! 以及三者共用的应答格式 `MessageResponse`。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Record, SyncSource};

/// 编排器发给页面内 Agent 的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// 开始滚动提取；`run_id` 标识本轮运行，随每条上报带回
    Begin { source: SyncSource, run_id: Uuid },
    /// 请求停止（下一次循环顶部检查时生效）
    Stop,
}

/// Agent 上报给编排器的进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentReport {
    /// 一批本轮新发现的记录
    Progress { run_id: Uuid, records: Vec<Record> },
    /// 自然到底
    Complete { run_id: Uuid },
    /// 提取过程出错
    Error { run_id: Uuid, error: String },
}

impl AgentReport {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentReport::Progress { .. } => "progress",
            AgentReport::Complete { .. } => "complete",
            AgentReport::Error { .. } => "error",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            AgentReport::Progress { run_id, .. }
            | AgentReport::Complete { run_id }
            | AgentReport::Error { run_id, .. } => *run_id,
        }
    }
}

/// 控制端（命令行、弹窗等）发给编排器的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    StartSync {
        source: SyncSource,
        #[serde(default)]
        handle: Option<String>,
    },
    StopSync,
    GetSyncStatus,
    GetSyncedRecords,
    /// 清空集合并把状态重置为默认值
    ClearSyncedData,
}

/// 每条消息恰好得到一个应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// 失败原因；成功时为 None
    pub fn error_message(&self) -> Option<&str> {
        if self.success {
            None
        } else {
            Some(self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}
