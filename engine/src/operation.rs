//! Operation types for queued mutations.
//!
//! A user action is never applied to the remote store directly. It is first
//! turned into an operation and written to the durable queue; the
//! coordinator replays it later. The operation type is a closed set so the
//! executor can match on it exhaustively.

use crate::{record::Entity, QueueId, Timestamp};
use serde::{Deserialize, Serialize};

/// What a queued operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Update,
    Delete,
}

/// The closed set of queueable mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    AddTransaction,
    UpdateTransaction,
    DeleteTransaction,
    AddDebt,
    UpdateDebt,
    DeleteDebt,
    AddTobacco,
    UpdateTobacco,
    DeleteTobacco,
}

impl OperationType {
    /// Build the type from its two halves.
    pub fn new(kind: OpKind, entity: Entity) -> Self {
        use OperationType::*;
        match (kind, entity) {
            (OpKind::Add, Entity::Transaction) => AddTransaction,
            (OpKind::Update, Entity::Transaction) => UpdateTransaction,
            (OpKind::Delete, Entity::Transaction) => DeleteTransaction,
            (OpKind::Add, Entity::Debt) => AddDebt,
            (OpKind::Update, Entity::Debt) => UpdateDebt,
            (OpKind::Delete, Entity::Debt) => DeleteDebt,
            (OpKind::Add, Entity::Tobacco) => AddTobacco,
            (OpKind::Update, Entity::Tobacco) => UpdateTobacco,
            (OpKind::Delete, Entity::Tobacco) => DeleteTobacco,
        }
    }

    pub fn kind(self) -> OpKind {
        use OperationType::*;
        match self {
            AddTransaction | AddDebt | AddTobacco => OpKind::Add,
            UpdateTransaction | UpdateDebt | UpdateTobacco => OpKind::Update,
            DeleteTransaction | DeleteDebt | DeleteTobacco => OpKind::Delete,
        }
    }

    pub fn entity(self) -> Entity {
        use OperationType::*;
        match self {
            AddTransaction | UpdateTransaction | DeleteTransaction => Entity::Transaction,
            AddDebt | UpdateDebt | DeleteDebt => Entity::Debt,
            AddTobacco | UpdateTobacco | DeleteTobacco => Entity::Tobacco,
        }
    }

    /// Wire name, e.g. `ADD_TRANSACTION`.
    pub fn as_str(self) -> &'static str {
        use OperationType::*;
        match self {
            AddTransaction => "ADD_TRANSACTION",
            UpdateTransaction => "UPDATE_TRANSACTION",
            DeleteTransaction => "DELETE_TRANSACTION",
            AddDebt => "ADD_DEBT",
            UpdateDebt => "UPDATE_DEBT",
            DeleteDebt => "DELETE_DEBT",
            AddTobacco => "ADD_TOBACCO",
            UpdateTobacco => "UPDATE_TOBACCO",
            DeleteTobacco => "DELETE_TOBACCO",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown operation type: {}", s))
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting for the next drain
    Pending,
    /// Claimed by an in-flight drain
    Syncing,
    /// Retry budget exhausted; needs manual attention
    Failed,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Syncing => "syncing",
            OperationStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "syncing" => Ok(OperationStatus::Syncing),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(format!("unknown operation status: {}", other)),
        }
    }
}

/// A mutation intent as produced by a caller, before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Payload; must carry the entity's correlation key
    pub data: serde_json::Value,
}

impl NewOperation {
    pub fn new(op_type: OperationType, data: serde_json::Value) -> Self {
        Self { op_type, data }
    }

    /// The client-generated correlation key, if present.
    pub fn correlation_key(&self) -> Option<String> {
        self.op_type.entity().natural_key(&self.data)
    }
}

/// An operation as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Store-assigned, monotonically increasing identity
    pub id: QueueId,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub data: serde_json::Value,
    /// Creation time in milliseconds; the drain order key
    pub timestamp: Timestamp,
    pub status: OperationStatus,
    pub retry_count: u32,
    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueuedOperation {
    /// Natural key of the targeted record.
    pub fn correlation_key(&self) -> Option<String> {
        self.op_type.entity().natural_key(&self.data)
    }

    /// Whether `other` describes the same logical mutation.
    pub fn is_duplicate_of(&self, other: &NewOperation) -> bool {
        self.op_type == other.op_type
            && self.correlation_key().is_some()
            && self.correlation_key() == other.correlation_key()
    }
}

/// Drain order: oldest first, queue id breaks timestamp ties.
impl Ord for QueuedOperation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for QueuedOperation {}
