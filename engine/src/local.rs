//! Local durable key-value store.
//!
//! Holds the whole-dataset offline mirror and the latest local backup.
//! Values are JSON text.

use crate::{
    clock::Clock, db::Pool, error::Result, snapshot::BackupSnapshot, LedgerDocument, Timestamp,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key of the whole-dataset mirror written while offline.
pub const MIRROR_KEY: &str = "offline_data";

/// Key of the most recent local backup.
pub const BACKUP_KEY: &str = "backup:latest";

/// String key-value storage on the local device.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove a key; removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Key-value store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Key-value store in the local SQLite database (`kv` table).
pub struct SqliteLocalStore {
    pool: Pool,
    clock: Arc<dyn Clock>,
}

impl SqliteLocalStore {
    pub fn new(pool: Pool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let updated_at: Timestamp = self.clock.now_millis();
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// The offline whole-dataset mirror.
#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn LocalStore>,
}

impl LocalMirror {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<LedgerDocument>> {
        match self.store.get(MIRROR_KEY).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, document: &LedgerDocument) -> Result<()> {
        let text = serde_json::to_string(document)?;
        self.store.set(MIRROR_KEY, text).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove(MIRROR_KEY).await
    }
}

/// Backups kept on the device so a restore does not need a file.
#[derive(Clone)]
pub struct LocalBackups {
    store: Arc<dyn LocalStore>,
}

impl LocalBackups {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Replace the stored backup with `snapshot`.
    pub async fn save(&self, snapshot: &BackupSnapshot) -> Result<()> {
        self.store.set(BACKUP_KEY, snapshot.to_json()?).await
    }

    /// The latest stored backup, validated like a user-supplied file.
    pub async fn latest(&self) -> Result<Option<BackupSnapshot>> {
        match self.store.get(BACKUP_KEY).await? {
            Some(text) => BackupSnapshot::from_json(&text).map(Some),
            None => Ok(None),
        }
    }
}
