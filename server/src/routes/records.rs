//! Entity record routes.
//!
//! Writes are idempotent by natural key, so a client replaying an operation
//! after a lost response lands on the same row.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{patch, post, put},
    Json, Router,
};
use serde::Serialize;
use tally_engine::{DateRange, Entity};

use crate::auth::AuthUser;
use crate::db::{self, KeyedRecord};
use crate::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WrittenResponse {
    pub written: usize,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: u64,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/records/{entity}",
            put(upsert_handler).get(list_handler).delete(delete_all_handler),
        )
        .route("/v1/records/{entity}/batch", post(batch_handler))
        .route(
            "/v1/records/{entity}/{key}",
            patch(update_handler).delete(delete_handler),
        )
}

fn parse_entity(name: &str) -> Result<Entity> {
    Entity::from_collection(name)
        .ok_or_else(|| AppError::NotFound(format!("unknown collection '{}'", name)))
}

/// Check a full record against the ledger schema and pull out its key.
fn keyed_record(state: &AppState, entity: Entity, payload: serde_json::Value) -> Result<KeyedRecord> {
    let key = entity.natural_key(&payload).ok_or_else(|| {
        AppError::BadRequest(format!("record is missing its '{}' key", entity.key_field()))
    })?;
    if let Some(schema) = state.schema.get(entity) {
        schema.validate_record(&payload)?;
    }
    Ok(KeyedRecord { key, payload })
}

/// PUT /v1/records/{entity}
async fn upsert_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(entity): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<StatusCode> {
    let entity = parse_entity(&entity)?;
    let record = keyed_record(&state, entity, payload)?;

    db::upsert_record(&state.pool, &auth.owner, entity, &record).await?;
    tracing::debug!(owner = %auth.owner, %entity, key = %record.key, "Record written");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/records/{entity}/batch
async fn batch_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(entity): Path<String>,
    Json(payloads): Json<Vec<serde_json::Value>>,
) -> Result<Json<WrittenResponse>> {
    let entity = parse_entity(&entity)?;
    if payloads.len() > state.config.batch_limit {
        return Err(AppError::BadRequest(format!(
            "batch of {} exceeds the limit of {}",
            payloads.len(),
            state.config.batch_limit
        )));
    }

    let records = payloads
        .into_iter()
        .map(|payload| keyed_record(&state, entity, payload))
        .collect::<Result<Vec<_>>>()?;

    let written = db::upsert_records(&state.pool, &auth.owner, entity, &records).await?;
    tracing::info!(owner = %auth.owner, %entity, written, "Batch written");
    Ok(Json(WrittenResponse { written }))
}

/// PATCH /v1/records/{entity}/{key}
///
/// Updating a record that does not exist changes nothing.
async fn update_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((entity, key)): Path<(String, String)>,
    Json(mut fields): Json<serde_json::Value>,
) -> Result<Json<UpdatedResponse>> {
    let entity = parse_entity(&entity)?;
    let object = fields
        .as_object_mut()
        .ok_or_else(|| AppError::BadRequest("update body must be an object".into()))?;
    // The key addresses the row; it is never rewritten
    object.remove(entity.key_field());

    if let Some(schema) = state.schema.get(entity) {
        schema.validate_partial(&fields)?;
    }

    let updated = db::merge_record(&state.pool, &auth.owner, entity, &key, &fields).await?;
    if updated == 0 {
        tracing::debug!(owner = %auth.owner, %entity, %key, "Update of missing record ignored");
    }
    Ok(Json(UpdatedResponse { updated }))
}

/// DELETE /v1/records/{entity}/{key}
async fn delete_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((entity, key)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>> {
    let entity = parse_entity(&entity)?;
    let deleted = db::delete_record(&state.pool, &auth.owner, entity, &key).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// DELETE /v1/records/{entity}
async fn delete_all_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(entity): Path<String>,
) -> Result<Json<DeletedResponse>> {
    let entity = parse_entity(&entity)?;
    let deleted = db::delete_all_records(&state.pool, &auth.owner, entity).await?;
    tracing::info!(owner = %auth.owner, %entity, deleted, "Collection cleared");
    Ok(Json(DeletedResponse { deleted }))
}

/// GET /v1/records/{entity}?from=&to=
async fn list_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(entity): Path<String>,
    Query(range): Query<DateRange>,
) -> Result<Json<Vec<serde_json::Value>>> {
    let entity = parse_entity(&entity)?;
    let records = db::list_records(&state.pool, &auth.owner, entity, range).await?;
    Ok(Json(records))
}
