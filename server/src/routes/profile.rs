//! Profile routes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::auth::AuthUser;
use crate::db;
use crate::error::Result;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/profile", get(get_profile).put(put_profile))
}

/// GET /v1/profile - `null` until a profile has been saved.
async fn get_profile(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>> {
    let profile = db::get_profile(&state.pool, &auth.owner).await?;
    Ok(Json(profile.unwrap_or(serde_json::Value::Null)))
}

async fn put_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(profile): Json<serde_json::Value>,
) -> Result<StatusCode> {
    db::put_profile(&state.pool, &auth.owner, &profile).await?;
    Ok(StatusCode::NO_CONTENT)
}
