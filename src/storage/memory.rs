//! 进程内 Repository：读写锁保护的集合与状态

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{merge_new, Repository, StorageError};
use crate::core::{Record, SyncStatus};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<Vec<Record>>,
    status: RwLock<Option<SyncStatus>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get(&self) -> Result<Vec<Record>, StorageError> {
        Ok(self.records.read().await.clone())
    }

    async fn merge(&self, batch: Vec<Record>) -> Result<usize, StorageError> {
        // 写锁覆盖整个读改写
        let mut records = self.records.write().await;
        Ok(merge_new(&mut records, batch))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn get_status(&self) -> Result<SyncStatus, StorageError> {
        Ok(self.status.read().await.clone().unwrap_or_default())
    }

    async fn set_status(&self, status: SyncStatus) -> Result<(), StorageError> {
        *self.status.write().await = Some(status);
        Ok(())
    }
}
