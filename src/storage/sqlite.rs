//! SQLite 持久化：单表键值存储
//!
//! 表 `kv(key TEXT PRIMARY KEY, value TEXT)`，记录集合与同步状态各占一个固定键，值为 JSON。
//! rusqlite 为同步接口，所有访问都放进 spawn_blocking，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{merge_new, Repository, StorageError};
use crate::core::{Record, SyncStatus};

/// 记录集合所在键
pub const KEY_RECORDS: &str = "syncedRecords";
/// 同步状态所在键
pub const KEY_STATUS: &str = "syncStatus";

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Task(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::Task(format!("connection lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn read_blob<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>, StorageError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;
    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_blob<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, json],
    )?;
    Ok(())
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get(&self) -> Result<Vec<Record>, StorageError> {
        self.with_conn(|conn| Ok(read_blob::<Vec<Record>>(conn, KEY_RECORDS)?.unwrap_or_default()))
            .await
    }

    async fn merge(&self, batch: Vec<Record>) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut records: Vec<Record> = read_blob(&tx, KEY_RECORDS)?.unwrap_or_default();
            let added = merge_new(&mut records, batch);
            if added == 0 {
                return Ok(0);
            }
            write_blob(&tx, KEY_RECORDS, &records)?;
            tx.commit()?;
            Ok(added)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![KEY_RECORDS])?;
            Ok(())
        })
        .await
    }

    async fn get_status(&self) -> Result<SyncStatus, StorageError> {
        self.with_conn(|conn| Ok(read_blob::<SyncStatus>(conn, KEY_STATUS)?.unwrap_or_default()))
            .await
    }

    async fn set_status(&self, status: SyncStatus) -> Result<(), StorageError> {
        self.with_conn(move |conn| write_blob(conn, KEY_STATUS, &status))
            .await
    }
}
