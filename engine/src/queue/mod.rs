//! Persistent operation queue.
//!
//! The queue is the source of truth for work not yet confirmed by the remote
//! store. An operation is durable once [`OperationQueue::add_operation`]
//! returns; only then may the caller treat the mutation as applied.
//!
//! Storage is split in two layers:
//! - [`OperationTable`] - a plain table abstraction (insert, get, scan by
//!   status, update, delete), implemented in memory and over SQLite
//! - [`OperationQueue`] - queue semantics on top: validation, duplicate
//!   suppression, status transitions, stats and maintenance

mod memory;
mod sqlite;

pub use memory::MemoryTable;
pub use sqlite::SqliteTable;

use crate::{
    clock::Clock, error::Result, NewOperation, OperationStatus, QueueId, QueuedOperation, Schema,
    Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A row about to be inserted; the table assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDraft {
    pub op: NewOperation,
    pub timestamp: Timestamp,
}

/// Table-level access to stored operations.
///
/// Lookups of a missing id return `None`/`false`; only failures of the
/// storage itself are errors.
#[async_trait]
pub trait OperationTable: Send + Sync {
    /// Insert a pending row with a zero retry count; returns its id.
    async fn insert(&self, draft: OperationDraft) -> Result<QueueId>;

    async fn get(&self, id: QueueId) -> Result<Option<QueuedOperation>>;

    async fn get_all(&self) -> Result<Vec<QueuedOperation>>;

    async fn get_all_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>>;

    /// Overwrite status, retry count and error of an existing row.
    async fn update(&self, op: &QueuedOperation) -> Result<bool>;

    async fn delete(&self, id: QueueId) -> Result<bool>;

    /// Stored rows that cannot be decoded into an operation. The scans
    /// above leave such rows out.
    async fn count_unreadable(&self) -> Result<usize> {
        Ok(0)
    }

    /// Delete every row that cannot be decoded; returns how many went.
    async fn delete_unreadable(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Counts of queued operations by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    /// Rows that could not be decoded; part of `total`, in no status
    #[serde(default)]
    pub unreadable: usize,
    pub total: usize,
}

/// The operation queue.
pub struct OperationQueue {
    table: Arc<dyn OperationTable>,
    schema: Schema,
    clock: Arc<dyn Clock>,
    /// Serializes the duplicate scan with the insert that follows it
    write_lock: Mutex<()>,
}

impl OperationQueue {
    pub fn new(table: Arc<dyn OperationTable>, schema: Schema, clock: Arc<dyn Clock>) -> Self {
        Self {
            table,
            schema,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Queue a mutation intent.
    ///
    /// If a pending operation with the same type and correlation key already
    /// exists, its id is returned and nothing is inserted.
    pub async fn add_operation(&self, op: NewOperation) -> Result<QueueId> {
        self.schema.validate_operation(&op)?;

        let _guard = self.write_lock.lock().await;

        let pending = self.table.get_all_by_status(OperationStatus::Pending).await?;
        if let Some(existing) = pending.iter().find(|p| p.is_duplicate_of(&op)) {
            tracing::debug!(
                op_id = existing.id,
                op_type = %op.op_type,
                "Duplicate operation already pending, reusing it"
            );
            return Ok(existing.id);
        }

        let op_type = op.op_type;
        let timestamp = self.clock.now_millis();
        let id = self.table.insert(OperationDraft { op, timestamp }).await?;

        tracing::info!(op_id = id, op_type = %op_type, "Operation queued");
        Ok(id)
    }

    /// All pending operations, in no particular order.
    pub async fn pending_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.table.get_all_by_status(OperationStatus::Pending).await
    }

    /// Every stored operation regardless of status.
    pub async fn all_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.table.get_all().await
    }

    pub async fn has_pending(&self) -> Result<bool> {
        Ok(!self.pending_operations().await?.is_empty())
    }

    /// Move an operation to `status`.
    ///
    /// Passing an error records a failed attempt: the message is stored and
    /// the retry count goes up by one. A missing id is logged and treated as
    /// already resolved.
    pub async fn update_operation_status(
        &self,
        id: QueueId,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<Option<QueuedOperation>> {
        let Some(mut op) = self.table.get(id).await? else {
            tracing::warn!(op_id = id, status = status.as_str(), "Operation no longer queued");
            return Ok(None);
        };

        op.status = status;
        if let Some(message) = error {
            op.retry_count += 1;
            op.error = Some(message);
        }

        if !self.table.update(&op).await? {
            tracing::warn!(op_id = id, "Operation vanished during status update");
            return Ok(None);
        }
        Ok(Some(op))
    }

    /// Remove an operation. Removing a missing id is not an error.
    pub async fn delete_operation(&self, id: QueueId) -> Result<()> {
        if !self.table.delete(id).await? {
            tracing::debug!(op_id = id, "Operation already removed");
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let all = self.table.get_all().await?;
        let unreadable = self.table.count_unreadable().await?;
        let mut stats = QueueStats {
            unreadable,
            total: all.len() + unreadable,
            ..QueueStats::default()
        };
        for op in &all {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Syncing => stats.syncing += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Return operations left in `syncing` by an interrupted drain to
    /// `pending`. Their retry counts are untouched.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stuck = self.table.get_all_by_status(OperationStatus::Syncing).await?;
        let mut recovered = 0;
        for mut op in stuck {
            op.status = OperationStatus::Pending;
            if self.table.update(&op).await? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(count = recovered, "Recovered operations from interrupted sync");
        }
        Ok(recovered)
    }

    /// Delete all parked operations, along with any rows that can no
    /// longer be decoded.
    pub async fn purge_failed(&self) -> Result<usize> {
        let failed = self.table.get_all_by_status(OperationStatus::Failed).await?;
        let mut purged = 0;
        for op in failed {
            if self.table.delete(op.id).await? {
                purged += 1;
            }
        }

        let unreadable = self.table.delete_unreadable().await?;
        if unreadable > 0 {
            tracing::warn!(count = unreadable, "Purged unreadable queue rows");
        }
        tracing::info!(count = purged, "Purged failed operations");
        Ok(purged + unreadable)
    }

    /// Give parked operations a fresh retry budget.
    pub async fn retry_failed(&self) -> Result<usize> {
        let failed = self.table.get_all_by_status(OperationStatus::Failed).await?;
        let mut requeued = 0;
        for mut op in failed {
            op.status = OperationStatus::Pending;
            op.retry_count = 0;
            op.error = None;
            if self.table.update(&op).await? {
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}
