//! Whole-dataset view over the per-record collections.
//!
//! The fallback router loads and saves a [`LedgerDocument`], but the remote
//! only stores records. Loading lists the transaction and debt collections
//! and files them into a document; saving upserts every row of the document
//! by natural key. Rows the document does not mention are left alone, so a
//! save never removes a record the operation queue wrote in the meantime.

use super::{DocumentStore, RemoteResult, RemoteStore};
use crate::{record::Entity, LedgerDocument};
use async_trait::async_trait;
use std::sync::Arc;

/// Rows per batch call when saving a document.
const SAVE_CHUNK: usize = 100;

/// A [`DocumentStore`] backed by a [`RemoteStore`].
#[derive(Clone)]
pub struct RecordDocuments {
    records: Arc<dyn RemoteStore>,
}

impl RecordDocuments {
    pub fn new(records: Arc<dyn RemoteStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl DocumentStore for RecordDocuments {
    async fn load_document(&self) -> RemoteResult<Option<LedgerDocument>> {
        let transactions = self.records.list_all(Entity::Transaction, None).await?;
        let debts = self.records.list_all(Entity::Debt, None).await?;
        if transactions.is_empty() && debts.is_empty() {
            return Ok(None);
        }
        Ok(Some(LedgerDocument::from_records(transactions, debts)))
    }

    async fn save_document(&self, document: &LedgerDocument) -> RemoteResult<()> {
        let mut document = document.clone();
        let assigned = document.ensure_item_ids();
        if assigned > 0 {
            tracing::debug!(assigned, "Assigned ids to line items before saving");
        }

        let (transactions, debts) = document.to_records();
        for (entity, records) in [(Entity::Transaction, transactions), (Entity::Debt, debts)] {
            let mut written = 0;
            for chunk in records.chunks(SAVE_CHUNK) {
                written += self.records.insert_batch(entity, chunk.to_vec()).await?;
            }
            tracing::debug!(%entity, written, "Saved ledger rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Debt, LineItem};
    use crate::remote::{MemoryRemote, RemoteCall};
    use serde_json::json;

    fn item(id: Option<&str>, amount: f64) -> LineItem {
        LineItem {
            id: id.map(str::to_string),
            amount,
            category: None,
            note: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn empty_collections_load_as_none() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_or_update(Entity::Tobacco, json!({"client_id": "tb_1"}))
            .await
            .unwrap();

        let documents = RecordDocuments::new(remote);
        assert!(documents.load_document().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rows_written_one_by_one_load_as_a_document() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_or_update(
                Entity::Transaction,
                json!({"client_id": "tx_1", "amount": 50, "type": "income", "date": "2024-05-01"}),
            )
            .await
            .unwrap();
        remote
            .insert_or_update(Entity::Debt, json!({"name": "张三", "amount": 500}))
            .await
            .unwrap();

        let document = RecordDocuments::new(remote)
            .load_document()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.history["2024-05-01"].incomes[0].amount, 50.0);
        assert_eq!(document.debt("张三").unwrap().amount, 500.0);
    }

    #[tokio::test]
    async fn save_upserts_in_chunks_and_keeps_other_rows() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_or_update(Entity::Debt, json!({"name": "李四", "amount": 20}))
            .await
            .unwrap();
        remote.clear_calls().await;

        let mut document = LedgerDocument::default();
        let day = document.history.entry("2024-05-01".into()).or_default();
        day.expenses = (0..150).map(|i| item(Some(&format!("e{}", i)), 1.0)).collect();
        day.incomes.push(item(None, 9.0));
        document.debts.push(Debt::new("张三", 500.0));

        let documents = RecordDocuments::new(remote.clone());
        documents.save_document(&document).await.unwrap();

        assert_eq!(
            remote.calls().await,
            vec![
                RemoteCall::InsertBatch { entity: Entity::Transaction, count: 100 },
                RemoteCall::InsertBatch { entity: Entity::Transaction, count: 51 },
                RemoteCall::InsertBatch { entity: Entity::Debt, count: 1 },
            ]
        );
        assert_eq!(remote.record_count(Entity::Transaction).await, 151);
        assert!(remote.record(Entity::Debt, "李四").await.is_some());

        let reloaded = documents.load_document().await.unwrap().unwrap();
        assert_eq!(reloaded.item_count(), 151);
        assert_eq!(reloaded.debts.len(), 2);
    }
}
