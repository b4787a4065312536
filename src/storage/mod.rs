//! 持久化层：采集记录集合 + 同步状态单例
//!
//! - **repository**: `Repository` 接口与合并规则（新记录整体前插，按 id 去重）
//! - **memory**: 进程内实现（测试、临时运行）
//! - **sqlite**: SQLite 键值表实现，两个固定键分别存放记录集合与状态

pub mod memory;
pub mod repository;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use repository::{merge_new, Repository};
pub use sqlite::{SqliteRepository, KEY_RECORDS, KEY_STATUS};

use thiserror::Error;

/// 存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// spawn_blocking 任务失败或连接锁中毒
    #[error("Storage task failed: {0}")]
    Task(String),
}
