//! End-to-end tests of the record store through the engine's HTTP remote.
//!
//! These tests require a running server backed by PostgreSQL.
//! Set TALLY_TEST_SERVER (e.g. `http://127.0.0.1:3000`) before running;
//! without it every test returns early. The server must run without
//! AUTH_SECRET so each test can pick a fresh owner.

use serde_json::json;
use std::time::Duration;
use std::sync::Arc;
use tally_engine::{
    DateRange, Debt, DocumentStore, Entity, HttpRemote, LedgerDocument, RecordDocuments,
    RemoteError, RemoteStore,
};

fn server_url() -> Option<String> {
    std::env::var("TALLY_TEST_SERVER").ok()
}

/// A remote scoped to an owner no other test uses.
fn remote(url: &str, label: &str) -> HttpRemote {
    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    HttpRemote::new(
        url,
        Some(format!("test-{}-{}", label, stamp)),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn health_check() {
    let Some(url) = server_url() else { return };

    let body: serde_json::Value = reqwest::get(format!("{}/health", url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn upsert_is_idempotent_by_key() {
    let Some(url) = server_url() else { return };
    let remote = remote(&url, "upsert");

    for amount in [300, 500] {
        remote
            .insert_or_update(Entity::Debt, json!({"name": "张三", "amount": amount}))
            .await
            .unwrap();
    }

    let debts = remote.list_all(Entity::Debt, None).await.unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0]["amount"], 500);
}

#[tokio::test]
async fn update_merges_and_ignores_missing() {
    let Some(url) = server_url() else { return };
    let remote = remote(&url, "update");

    remote
        .insert_or_update(
            Entity::Transaction,
            json!({"client_id": "tx_1", "amount": 50, "category": "food"}),
        )
        .await
        .unwrap();
    remote
        .update(Entity::Transaction, "tx_1", json!({"amount": 75}))
        .await
        .unwrap();
    remote
        .update(Entity::Transaction, "tx_missing", json!({"amount": 1}))
        .await
        .unwrap();

    let listed = remote.list_all(Entity::Transaction, None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["amount"], 75);
    assert_eq!(listed[0]["category"], "food");
}

#[tokio::test]
async fn deletes_are_idempotent() {
    let Some(url) = server_url() else { return };
    let remote = remote(&url, "delete");

    remote
        .insert_batch(
            Entity::Tobacco,
            vec![json!({"client_id": "tb_1"}), json!({"client_id": "tb_2"})],
        )
        .await
        .unwrap();
    remote.delete(Entity::Tobacco, "tb_1").await.unwrap();
    remote.delete(Entity::Tobacco, "tb_1").await.unwrap();
    assert_eq!(remote.list_all(Entity::Tobacco, None).await.unwrap().len(), 1);

    assert_eq!(remote.delete_all(Entity::Tobacco).await.unwrap(), 1);
    assert_eq!(remote.delete_all(Entity::Tobacco).await.unwrap(), 0);
}

#[tokio::test]
async fn list_filters_by_date() {
    let Some(url) = server_url() else { return };
    let remote = remote(&url, "range");

    let written = remote
        .insert_batch(
            Entity::Transaction,
            vec![
                json!({"client_id": "a", "amount": 1, "date": "2024-04-30"}),
                json!({"client_id": "b", "amount": 2, "date": "2024-05-01"}),
                json!({"client_id": "c", "amount": 3, "date": "2024-05-31"}),
                json!({"client_id": "d", "amount": 4}),
            ],
        )
        .await
        .unwrap();
    assert_eq!(written, 4);

    let may = DateRange::new(
        chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        chrono::NaiveDate::from_ymd_opt(2024, 5, 31),
    );
    let listed = remote.list_all(Entity::Transaction, Some(may)).await.unwrap();
    let keys: Vec<_> = listed.iter().map(|r| r["client_id"].clone()).collect();
    assert_eq!(keys, vec![json!("b"), json!("c")]);

    assert_eq!(remote.list_all(Entity::Transaction, None).await.unwrap().len(), 4);
}

#[tokio::test]
async fn owners_are_isolated() {
    let Some(url) = server_url() else { return };
    let alice = remote(&url, "alice");
    let bob = remote(&url, "bob");

    alice
        .insert_or_update(Entity::Debt, json!({"name": "shared", "amount": 1}))
        .await
        .unwrap();
    assert!(bob.list_all(Entity::Debt, None).await.unwrap().is_empty());
    assert_eq!(bob.delete_all(Entity::Debt).await.unwrap(), 0);
    assert_eq!(alice.list_all(Entity::Debt, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn profile_round_trip() {
    let Some(url) = server_url() else { return };
    let remote = remote(&url, "profile");

    assert!(remote.fetch_profile().await.unwrap().is_null());
    remote
        .save_profile(json!({"shop": "Corner Store", "currency": "CNY"}))
        .await
        .unwrap();
    assert_eq!(remote.fetch_profile().await.unwrap()["shop"], "Corner Store");
}

#[tokio::test]
async fn ledger_document_is_a_view_of_the_records() {
    let Some(url) = server_url() else { return };
    let remote = Arc::new(remote(&url, "ledger"));
    let documents = RecordDocuments::new(remote.clone());

    assert!(documents.load_document().await.unwrap().is_none());

    let mut document: LedgerDocument = serde_json::from_value(json!({
        "history": {"2024-05-01": {"incomes": [{"id": "i1", "amount": 20}], "expenses": []}}
    }))
    .unwrap();
    document.debts.push(Debt::new("张三", 500.0));
    documents.save_document(&document).await.unwrap();

    let income = &remote.list_all(Entity::Transaction, None).await.unwrap()[0];
    assert_eq!(income["client_id"], "i1");
    assert_eq!(income["type"], "income");

    // A row written on its own is part of the next load
    remote
        .insert_or_update(Entity::Debt, json!({"name": "李四", "amount": 20}))
        .await
        .unwrap();
    let loaded = documents.load_document().await.unwrap().unwrap();
    assert_eq!(loaded.history, document.history);
    assert_eq!(loaded.debt("张三").unwrap().amount, 500.0);
    assert_eq!(loaded.debt("李四").unwrap().amount, 20.0);
}

#[tokio::test]
async fn invalid_records_are_rejected_not_retried() {
    let Some(url) = server_url() else { return };
    let remote = remote(&url, "invalid");

    let err = remote
        .insert_or_update(Entity::Transaction, json!({"client_id": "tx_1", "amount": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));
    assert!(!err.is_transient());
}
