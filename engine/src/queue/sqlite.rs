//! SQLite-backed operation table.

use super::{OperationDraft, OperationTable};
use crate::{db::Pool, error::Result, Error, OperationStatus, QueueId, QueuedOperation};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

/// A stored operation row from the database.
#[derive(Debug)]
struct StoredOperation {
    id: i64,
    op_type: String,
    data: String,
    timestamp: i64,
    status: String,
    retry_count: i64,
    error: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredOperation {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredOperation {
            id: row.try_get("id")?,
            op_type: row.try_get("op_type")?,
            data: row.try_get("data")?,
            timestamp: row.try_get("timestamp")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            error: row.try_get("error")?,
        })
    }
}

impl StoredOperation {
    /// Convert a database row to a queued operation.
    fn to_operation(&self) -> Result<QueuedOperation> {
        Ok(QueuedOperation {
            id: self.id,
            op_type: self.op_type.parse().map_err(Error::Storage)?,
            data: serde_json::from_str(&self.data)?,
            timestamp: self.timestamp.max(0) as u64,
            status: self.status.parse().map_err(Error::Storage)?,
            retry_count: self.retry_count.max(0) as u32,
            error: self.error.clone(),
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, op_type, data, timestamp, status, retry_count, error FROM operations";

/// Operation table in the local SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteTable {
    pool: Pool,
}

impl SqliteTable {
    /// Wrap a pool that has had migrations applied.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Ids of rows that fail to decode.
    async fn unreadable_ids(&self) -> Result<Vec<QueueId>> {
        let rows = sqlx::query_as::<_, StoredOperation>(SELECT_COLUMNS)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter(|row| row.to_operation().is_err())
            .map(|row| row.id)
            .collect())
    }

    fn convert(rows: Vec<StoredOperation>) -> Result<Vec<QueuedOperation>> {
        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            match row.to_operation() {
                Ok(op) => ops.push(op),
                Err(e) => {
                    // A corrupt row must not wedge the whole queue
                    tracing::warn!(op_id = row.id, error = %e, "Skipping unreadable queue row");
                }
            }
        }
        Ok(ops)
    }
}

#[async_trait]
impl OperationTable for SqliteTable {
    async fn insert(&self, draft: OperationDraft) -> Result<QueueId> {
        let data = serde_json::to_string(&draft.op.data)?;
        let result = sqlx::query(
            r#"
            INSERT INTO operations (op_type, data, timestamp, status, retry_count)
            VALUES (?1, ?2, ?3, 'pending', 0)
            "#,
        )
        .bind(draft.op.op_type.as_str())
        .bind(data)
        .bind(draft.timestamp as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: QueueId) -> Result<Option<QueuedOperation>> {
        let row = sqlx::query_as::<_, StoredOperation>(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.to_operation()).transpose()
    }

    async fn get_all(&self) -> Result<Vec<QueuedOperation>> {
        let rows = sqlx::query_as::<_, StoredOperation>(&format!(
            "{} ORDER BY timestamp ASC, id ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::convert(rows)
    }

    async fn get_all_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>> {
        let rows = sqlx::query_as::<_, StoredOperation>(&format!(
            "{} WHERE status = ?1 ORDER BY timestamp ASC, id ASC",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::convert(rows)
    }

    async fn update(&self, op: &QueuedOperation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = ?1, retry_count = ?2, error = ?3
            WHERE id = ?4
            "#,
        )
        .bind(op.status.as_str())
        .bind(op.retry_count as i64)
        .bind(&op.error)
        .bind(op.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: QueueId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM operations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_unreadable(&self) -> Result<usize> {
        Ok(self.unreadable_ids().await?.len())
    }

    async fn delete_unreadable(&self) -> Result<usize> {
        let ids = self.unreadable_ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM operations WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(deleted)
    }
}
