//! Queries against the records table.
//!
//! Rows are addressed by `(owner, entity, record_key)` where the key is the
//! entity's natural key (`name` for debts, `client_id` otherwise).

use sqlx::PgPool;
use tally_engine::{DateRange, Entity};

/// A record ready to be written: its natural key and full payload.
#[derive(Debug, Clone)]
pub struct KeyedRecord {
    pub key: String,
    pub payload: serde_json::Value,
}

const UPSERT: &str = r#"
    INSERT INTO records (owner, entity, record_key, payload)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (owner, entity, record_key) DO UPDATE SET
        payload = EXCLUDED.payload,
        updated_at = now()
"#;

/// Insert a record or replace the one with the same key.
pub async fn upsert_record(
    pool: &PgPool,
    owner: &str,
    entity: Entity,
    record: &KeyedRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(UPSERT)
        .bind(owner)
        .bind(entity.collection())
        .bind(&record.key)
        .bind(&record.payload)
        .execute(pool)
        .await?;

    Ok(())
}

/// Upsert many records in one transaction; all or nothing.
pub async fn upsert_records(
    pool: &PgPool,
    owner: &str,
    entity: Entity,
    records: &[KeyedRecord],
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for record in records {
        sqlx::query(UPSERT)
            .bind(owner)
            .bind(entity.collection())
            .bind(&record.key)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(records.len())
}

/// Merge `fields` into an existing record. Returns the number of rows touched.
pub async fn merge_record(
    pool: &PgPool,
    owner: &str,
    entity: Entity,
    key: &str,
    fields: &serde_json::Value,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE records
        SET payload = payload || $4, updated_at = now()
        WHERE owner = $1 AND entity = $2 AND record_key = $3
        "#,
    )
    .bind(owner)
    .bind(entity.collection())
    .bind(key)
    .bind(fields)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_record(
    pool: &PgPool,
    owner: &str,
    entity: Entity,
    key: &str,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM records WHERE owner = $1 AND entity = $2 AND record_key = $3")
            .bind(owner)
            .bind(entity.collection())
            .bind(key)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}

/// Delete every record of one entity for an owner.
pub async fn delete_all_records(
    pool: &PgPool,
    owner: &str,
    entity: Entity,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM records WHERE owner = $1 AND entity = $2")
        .bind(owner)
        .bind(entity.collection())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// List an owner's records, optionally bounded by their `date` field.
///
/// Dates are stored as `YYYY-MM-DD` text, so text comparison orders them.
/// Records without a date only appear when the range is open on both ends.
pub async fn list_records(
    pool: &PgPool,
    owner: &str,
    entity: Entity,
    range: DateRange,
) -> Result<Vec<serde_json::Value>, sqlx::Error> {
    let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
        r#"
        SELECT payload
        FROM records
        WHERE owner = $1 AND entity = $2
          AND ($3::text IS NULL OR payload->>'date' >= $3)
          AND ($4::text IS NULL OR payload->>'date' <= $4)
        ORDER BY created_at ASC, record_key ASC
        "#,
    )
    .bind(owner)
    .bind(entity.collection())
    .bind(range.from.map(|d| d.to_string()))
    .bind(range.to.map(|d| d.to_string()))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(payload,)| payload).collect())
}
