//! Repository 接口
//!
//! 每个操作各自原子，但彼此之间不构成事务：状态只能整条读改写，
//! 并发调用者之间可能丢失更新（单 Agent 约束下不会发生）。

use std::collections::HashSet;

use async_trait::async_trait;

use super::StorageError;
use crate::core::{Record, SyncStatus};

/// 记录集合与同步状态的持久化接口
#[async_trait]
pub trait Repository: Send + Sync {
    /// 当前集合快照；从未写入时为空
    async fn get(&self) -> Result<Vec<Record>, StorageError>;

    /// 合并一批记录，返回真正新增的条数；全部重复时不写入
    async fn merge(&self, batch: Vec<Record>) -> Result<usize, StorageError>;

    /// 清空集合（不影响状态）
    async fn clear(&self) -> Result<(), StorageError>;

    /// 读取状态；从未写入时为默认空闲状态
    async fn get_status(&self) -> Result<SyncStatus, StorageError>;

    /// 整条替换状态
    async fn set_status(&self, status: SyncStatus) -> Result<(), StorageError>;
}

/// 把 batch 中 id 不在 existing 里的记录按原顺序插到最前面，返回新增条数。
///
/// 不对 batch 内部去重，调用方保证批内 id 唯一。
pub fn merge_new(existing: &mut Vec<Record>, batch: Vec<Record>) -> usize {
    let fresh: Vec<Record> = {
        let known: HashSet<&str> = existing.iter().map(|r| r.id.as_str()).collect();
        batch
            .into_iter()
            .filter(|r| !known.contains(r.id.as_str()))
            .collect()
    };
    let added = fresh.len();
    if added > 0 {
        existing.splice(0..0, fresh);
    }
    added
}
