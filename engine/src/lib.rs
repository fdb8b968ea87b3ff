//! # Tally Engine
//!
//! The offline operation queue and sync core of the Tally bookkeeping app.
//!
//! Every user mutation (add, update or delete of a transaction, debt or
//! tobacco record) becomes an [`Operation`](QueuedOperation) that is written
//! to a durable local queue *before* any network attempt. The queue is then
//! drained against the remote store whenever connectivity allows.
//!
//! ## Components
//!
//! - [`OperationQueue`] - durable queue with duplicate suppression on
//!   `(type, correlation key)`; backed by SQLite ([`SqliteTable`]) or memory
//! - [`Executor`] - maps each [`OperationType`] to one remote call
//! - [`SyncCoordinator`] - non-reentrant, strictly ordered drain with a retry
//!   budget and duplicate-as-success handling
//! - [`NetworkMonitor`] - turns [`Connectivity`] transitions into drains
//! - [`FallbackRouter`] - whole-dataset load/save with a local mirror that
//!   wins on reconnect
//! - [`ImportPipeline`] - confirmed replace-all restore from a
//!   [`BackupSnapshot`], and export
//!
//! The queue drain, the whole-dataset path and the import share one
//! [`DatasetLock`] so their remote writes never interleave.
//!
//! ## Ordering
//!
//! A drain replays operations sequentially, oldest timestamp first, ties
//! broken by queue id. An update queued after an add of the same record is
//! never applied before it.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tally_engine::{
//!     remote::MemoryRemote, Connectivity, DatasetLock, MemoryTable, NewOperation,
//!     OperationQueue, OperationType, Schema, SyncConfig, SyncCoordinator, SystemClock,
//!     TracingNotifier,
//! };
//!
//! # tokio_test_block_on(async {
//! let queue = Arc::new(OperationQueue::new(
//!     Arc::new(MemoryTable::new()),
//!     Schema::ledger(),
//!     Arc::new(SystemClock),
//! ));
//! let remote = Arc::new(MemoryRemote::new());
//! let coordinator = SyncCoordinator::new(
//!     queue,
//!     remote.clone(),
//!     Connectivity::new(true),
//!     Arc::new(TracingNotifier),
//!     DatasetLock::new(),
//!     &SyncConfig::default(),
//! );
//!
//! coordinator
//!     .enqueue(NewOperation::new(
//!         OperationType::AddTransaction,
//!         json!({"client_id": "tx_1", "amount": 50}),
//!     ))
//!     .await
//!     .unwrap();
//!
//! let report = coordinator.sync_to_cloud().await.unwrap();
//! assert_eq!(report.success, 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod import;
pub mod local;
pub mod lock;
pub mod network;
pub mod notify;
pub mod operation;
pub mod queue;
pub mod record;
pub mod remote;
pub mod router;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use coordinator::{SkipReason, SyncCoordinator, SyncReport};
pub use engine::SyncEngine;
pub use error::{Error, RemoteError, Result};
pub use executor::{Executor, RemoteAction};
pub use import::{
    ConfirmedImport, ImportPhase, ImportPipeline, ImportPlan, ImportProgress, ImportReport,
};
pub use local::{LocalBackups, LocalMirror, LocalStore, MemoryLocalStore, SqliteLocalStore};
pub use lock::{DatasetGuard, DatasetLock, LockHolder};
pub use network::{Connectivity, LifecycleEvent, NetworkMonitor};
pub use notify::{ChannelNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use operation::{NewOperation, OpKind, OperationStatus, OperationType, QueuedOperation};
pub use queue::{MemoryTable, OperationQueue, OperationTable, QueueStats, SqliteTable};
pub use record::{DayBook, Debt, Entity, LedgerDocument, LineItem};
pub use remote::{DateRange, DocumentStore, HttpRemote, RecordDocuments, RemoteStore};
pub use router::{FallbackRouter, Reloader, RouterMode, SaveOutcome};
pub use schema::{EntitySchema, FieldDef, FieldType, Schema};
pub use snapshot::{BackupSnapshot, BACKUP_FORMAT_VERSION};

/// Store-assigned queue entry id
pub type QueueId = i64;

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
