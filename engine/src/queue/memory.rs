//! In-memory operation table.

use super::{OperationDraft, OperationTable};
use crate::{error::Result, OperationStatus, QueueId, QueuedOperation};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Rows {
    next_id: QueueId,
    rows: BTreeMap<QueueId, QueuedOperation>,
}

/// Operation table kept in process memory.
///
/// Not durable; used where no local database is available and in tests.
#[derive(Debug, Default)]
pub struct MemoryTable {
    inner: Mutex<Rows>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationTable for MemoryTable {
    async fn insert(&self, draft: OperationDraft) -> Result<QueueId> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.rows.insert(
            id,
            QueuedOperation {
                id,
                op_type: draft.op.op_type,
                data: draft.op.data,
                timestamp: draft.timestamp,
                status: OperationStatus::Pending,
                retry_count: 0,
                error: None,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: QueueId) -> Result<Option<QueuedOperation>> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.inner.lock().await.rows.values().cloned().collect())
    }

    async fn get_all_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>> {
        Ok(self
            .inner
            .lock()
            .await
            .rows
            .values()
            .filter(|op| op.status == status)
            .cloned()
            .collect())
    }

    async fn update(&self, op: &QueuedOperation) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&op.id) {
            Some(row) => {
                row.status = op.status;
                row.retry_count = op.retry_count;
                row.error = op.error.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: QueueId) -> Result<bool> {
        Ok(self.inner.lock().await.rows.remove(&id).is_some())
    }
}
