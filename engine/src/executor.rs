//! Operation executor.
//!
//! Maps a queued operation onto the one remote call that realizes it. No
//! retry or queue bookkeeping happens here, and remote errors are returned
//! unchanged for the coordinator to classify.

use crate::{
    error::RemoteError,
    record::Entity,
    remote::{RemoteResult, RemoteStore},
    OperationType, QueuedOperation,
};
use std::sync::Arc;

/// The remote call an operation turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteAction {
    /// Insert-or-update by natural key, so a replay that raced an earlier
    /// partial attempt lands on the same row
    Upsert {
        entity: Entity,
        record: serde_json::Value,
    },
    Update {
        entity: Entity,
        key: String,
        fields: serde_json::Value,
    },
    Delete {
        entity: Entity,
        key: String,
    },
}

impl RemoteAction {
    /// Plan the call for `op`.
    ///
    /// Fails with a rejection when the payload has lost its correlation key,
    /// which only happens to rows written by something other than the queue.
    pub fn plan(op: &QueuedOperation) -> RemoteResult<Self> {
        use OperationType::*;

        let missing_key = |entity: Entity| RemoteError::Rejected {
            status: 400,
            message: format!(
                "operation {} has no '{}' to address",
                op.id,
                entity.key_field()
            ),
        };

        let action = match op.op_type {
            AddTransaction => RemoteAction::Upsert {
                entity: Entity::Transaction,
                record: op.data.clone(),
            },
            AddDebt => RemoteAction::Upsert {
                entity: Entity::Debt,
                record: op.data.clone(),
            },
            AddTobacco => RemoteAction::Upsert {
                entity: Entity::Tobacco,
                record: op.data.clone(),
            },
            UpdateTransaction | UpdateDebt | UpdateTobacco => {
                let entity = op.op_type.entity();
                RemoteAction::Update {
                    entity,
                    key: op.correlation_key().ok_or_else(|| missing_key(entity))?,
                    fields: op.data.clone(),
                }
            }
            DeleteTransaction | DeleteDebt | DeleteTobacco => {
                let entity = op.op_type.entity();
                RemoteAction::Delete {
                    entity,
                    key: op.correlation_key().ok_or_else(|| missing_key(entity))?,
                }
            }
        };

        if let RemoteAction::Upsert { entity, record } = &action {
            if entity.natural_key(record).is_none() {
                return Err(missing_key(*entity));
            }
        }
        Ok(action)
    }
}

/// Runs queued operations against a remote store.
#[derive(Clone)]
pub struct Executor {
    remote: Arc<dyn RemoteStore>,
}

impl Executor {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Perform the remote call for `op`.
    pub async fn execute(&self, op: &QueuedOperation) -> RemoteResult<()> {
        match RemoteAction::plan(op)? {
            RemoteAction::Upsert { entity, record } => {
                self.remote.insert_or_update(entity, record).await
            }
            RemoteAction::Update {
                entity,
                key,
                fields,
            } => self.remote.update(entity, &key, fields).await,
            RemoteAction::Delete { entity, key } => self.remote.delete(entity, &key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteCall};
    use crate::OperationStatus;
    use serde_json::json;

    fn queued(op_type: OperationType, data: serde_json::Value) -> QueuedOperation {
        QueuedOperation {
            id: 1,
            op_type,
            data,
            timestamp: 0,
            status: OperationStatus::Syncing,
            retry_count: 0,
            error: None,
        }
    }

    #[test]
    fn plans_follow_operation_kind() {
        let add = RemoteAction::plan(&queued(
            OperationType::AddTobacco,
            json!({"client_id": "tb_1", "brand": "x"}),
        ))
        .unwrap();
        assert!(matches!(add, RemoteAction::Upsert { entity: Entity::Tobacco, .. }));

        let update = RemoteAction::plan(&queued(
            OperationType::UpdateDebt,
            json!({"name": "张三", "amount": 500}),
        ))
        .unwrap();
        assert_eq!(
            update,
            RemoteAction::Update {
                entity: Entity::Debt,
                key: "张三".into(),
                fields: json!({"name": "张三", "amount": 500}),
            }
        );

        let delete = RemoteAction::plan(&queued(
            OperationType::DeleteTransaction,
            json!({"client_id": "tx_9"}),
        ))
        .unwrap();
        assert_eq!(
            delete,
            RemoteAction::Delete {
                entity: Entity::Transaction,
                key: "tx_9".into()
            }
        );
    }

    #[test]
    fn keyless_payloads_are_rejected() {
        for op_type in [
            OperationType::AddDebt,
            OperationType::UpdateTransaction,
            OperationType::DeleteTobacco,
        ] {
            let err = RemoteAction::plan(&queued(op_type, json!({"amount": 1}))).unwrap_err();
            assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));
            assert!(!err.is_duplicate());
        }
    }

    #[tokio::test]
    async fn execute_reaches_the_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let executor = Executor::new(remote.clone());

        executor
            .execute(&queued(
                OperationType::AddTransaction,
                json!({"client_id": "tx_1", "amount": 50}),
            ))
            .await
            .unwrap();
        executor
            .execute(&queued(
                OperationType::DeleteTransaction,
                json!({"client_id": "tx_1"}),
            ))
            .await
            .unwrap();

        assert_eq!(
            remote.calls().await,
            vec![
                RemoteCall::InsertOrUpdate {
                    entity: Entity::Transaction,
                    key: "tx_1".into()
                },
                RemoteCall::Delete {
                    entity: Entity::Transaction,
                    key: "tx_1".into()
                },
            ]
        );
        assert_eq!(remote.record_count(Entity::Transaction).await, 0);
    }

    #[tokio::test]
    async fn remote_errors_pass_through() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_reachable(false);
        let executor = Executor::new(remote);

        let err = executor
            .execute(&queued(OperationType::DeleteDebt, json!({"name": "李四"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
    }
}
