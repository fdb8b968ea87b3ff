//! Remote store contracts.
//!
//! Two views of the same owner-scoped remote data:
//! - [`RemoteStore`] - per-record CRUD used by the operation executor and the
//!   batch import/export pipeline
//! - [`DocumentStore`] - whole-dataset load/save used by the fallback router,
//!   served by [`RecordDocuments`] over the same record collections
//!
//! The owner scope is a property of the client (its credentials), so no call
//! takes an owner argument. A client without credentials fails every call
//! with [`RemoteError::NotAuthenticated`] before touching the network.

mod document;
mod http;
mod memory;

pub use document::RecordDocuments;
pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall};

use crate::{error::RemoteError, record::Entity, LedgerDocument};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Inclusive date bounds for listing records by their `date` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Whether a record's `date` falls inside the range.
    ///
    /// Records without a parseable date only match an unbounded range.
    pub fn contains(&self, record: &serde_json::Value) -> bool {
        if self.from.is_none() && self.to.is_none() {
            return true;
        }
        let Some(date) = record
            .get("date")
            .and_then(|d| d.as_str())
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            return false;
        };
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Per-record access to the owner's remote collections.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record, or update the existing one with the same natural key.
    async fn insert_or_update(&self, entity: Entity, record: serde_json::Value)
        -> RemoteResult<()>;

    /// Merge `fields` into the record with natural key `key`.
    ///
    /// Updating a record that does not exist changes nothing.
    async fn update(&self, entity: Entity, key: &str, fields: serde_json::Value)
        -> RemoteResult<()>;

    /// Delete one record; deleting a missing record succeeds.
    async fn delete(&self, entity: Entity, key: &str) -> RemoteResult<()>;

    /// Delete every record of the entity; returns how many were removed.
    async fn delete_all(&self, entity: Entity) -> RemoteResult<u64>;

    /// Insert-or-update many records in one call; returns how many were written.
    async fn insert_batch(
        &self,
        entity: Entity,
        records: Vec<serde_json::Value>,
    ) -> RemoteResult<usize>;

    async fn list_all(
        &self,
        entity: Entity,
        range: Option<DateRange>,
    ) -> RemoteResult<Vec<serde_json::Value>>;

    /// The owner's profile, `Null` when none is stored.
    async fn fetch_profile(&self) -> RemoteResult<serde_json::Value>;

    async fn save_profile(&self, profile: serde_json::Value) -> RemoteResult<()>;
}

/// Whole-dataset access to the owner's ledger document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The stored document, `None` for an owner with no ledger rows.
    async fn load_document(&self) -> RemoteResult<Option<LedgerDocument>>;

    async fn save_document(&self, document: &LedgerDocument) -> RemoteResult<()>;
}
