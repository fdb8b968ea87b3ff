//! In-memory remote store.
//!
//! Behaves like the HTTP remote for a single owner: natural-key upserts,
//! idempotent deletes, no-op updates of missing records. It can be switched
//! unreachable or unauthenticated, and it records every call it serves so
//! callers can inspect ordering and batching.

use super::{DateRange, RemoteResult, RemoteStore};
use crate::{error::RemoteError, record::Entity};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// A call served by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    InsertOrUpdate { entity: Entity, key: String },
    Update { entity: Entity, key: String },
    Delete { entity: Entity, key: String },
    DeleteAll { entity: Entity },
    InsertBatch { entity: Entity, count: usize },
    ListAll { entity: Entity },
    FetchProfile,
    SaveProfile,
}

#[derive(Debug, Default)]
struct RemoteState {
    collections: HashMap<Entity, BTreeMap<String, serde_json::Value>>,
    profile: serde_json::Value,
    calls: Vec<RemoteCall>,
}

/// Remote store held in process memory.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    reachable: AtomicBool,
    authenticated: AtomicBool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            reachable: AtomicBool::new(true),
            authenticated: AtomicBool::new(true),
        }
    }

    /// Make every following call fail with a network error, or stop doing so.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Look up one stored record.
    pub async fn record(&self, entity: Entity, key: &str) -> Option<serde_json::Value> {
        let state = self.state.lock().await;
        state.collections.get(&entity)?.get(key).cloned()
    }

    pub async fn record_count(&self, entity: Entity) -> usize {
        let state = self.state.lock().await;
        state.collections.get(&entity).map_or(0, BTreeMap::len)
    }

    /// Calls served so far, oldest first.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    fn check(&self) -> RemoteResult<()> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(RemoteError::NotAuthenticated);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote unreachable".into()));
        }
        Ok(())
    }

    fn key_of(entity: Entity, record: &serde_json::Value) -> RemoteResult<String> {
        entity.natural_key(record).ok_or_else(|| RemoteError::Rejected {
            status: 400,
            message: format!("record is missing '{}'", entity.key_field()),
        })
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn insert_or_update(
        &self,
        entity: Entity,
        record: serde_json::Value,
    ) -> RemoteResult<()> {
        self.check()?;
        let key = Self::key_of(entity, &record)?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::InsertOrUpdate {
            entity,
            key: key.clone(),
        });
        state
            .collections
            .entry(entity)
            .or_default()
            .insert(key, record);
        Ok(())
    }

    async fn update(
        &self,
        entity: Entity,
        key: &str,
        fields: serde_json::Value,
    ) -> RemoteResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::Update {
            entity,
            key: key.to_string(),
        });
        let existing = state
            .collections
            .get_mut(&entity)
            .and_then(|c| c.get_mut(key));
        if let (Some(serde_json::Value::Object(target)), serde_json::Value::Object(changes)) =
            (existing, fields)
        {
            for (field, value) in changes {
                target.insert(field, value);
            }
        }
        Ok(())
    }

    async fn delete(&self, entity: Entity, key: &str) -> RemoteResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::Delete {
            entity,
            key: key.to_string(),
        });
        if let Some(collection) = state.collections.get_mut(&entity) {
            collection.remove(key);
        }
        Ok(())
    }

    async fn delete_all(&self, entity: Entity) -> RemoteResult<u64> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::DeleteAll { entity });
        let removed = state
            .collections
            .remove(&entity)
            .map_or(0, |c| c.len() as u64);
        Ok(removed)
    }

    async fn insert_batch(
        &self,
        entity: Entity,
        records: Vec<serde_json::Value>,
    ) -> RemoteResult<usize> {
        self.check()?;
        let keyed = records
            .into_iter()
            .map(|r| Self::key_of(entity, &r).map(|k| (k, r)))
            .collect::<RemoteResult<Vec<_>>>()?;

        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::InsertBatch {
            entity,
            count: keyed.len(),
        });
        let count = keyed.len();
        let collection = state.collections.entry(entity).or_default();
        for (key, record) in keyed {
            collection.insert(key, record);
        }
        Ok(count)
    }

    async fn list_all(
        &self,
        entity: Entity,
        range: Option<DateRange>,
    ) -> RemoteResult<Vec<serde_json::Value>> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::ListAll { entity });
        let range = range.unwrap_or_default();
        Ok(state
            .collections
            .get(&entity)
            .map(|c| c.values().filter(|r| range.contains(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_profile(&self) -> RemoteResult<serde_json::Value> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::FetchProfile);
        Ok(state.profile.clone())
    }

    async fn save_profile(&self, profile: serde_json::Value) -> RemoteResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.calls.push(RemoteCall::SaveProfile);
        state.profile = profile;
        Ok(())
    }
}
