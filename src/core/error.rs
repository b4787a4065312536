//! 同步错误类型
//!
//! 配置错误在 start 中同步返回且不改动状态；传输错误由 start 向上抛出、由 stop 吞掉；
//! 提取错误只在 Agent 内部出现并被转换为 error 上报。

use thiserror::Error;

use crate::storage::StorageError;

/// 编排层错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 缺少必要配置（如喜欢页需要用户名）
    #[error("Config error: {0}")]
    Config(String),

    /// 目标页面不可达、消息投递失败
    #[error("Transport error: {0}")]
    Transport(String),

    /// 目标页面无法创建或未就绪
    #[error("Surface error: {0}")]
    Surface(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
