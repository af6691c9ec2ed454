//! Record endpoints: pull, push and delete per collection.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use duet_engine::{wire, RemoteStore};
use serde_json::Value;

use super::validate_collection;
use crate::error::{AppError, Result};
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/collections/{collection}/records",
            get(pull_handler).post(push_handler),
        )
        .route(
            "/collections/{collection}/records/{id}",
            delete(delete_handler),
        )
}

/// GET /collections/{collection}/records - Every record in the collection.
async fn pull_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Value>>> {
    validate_collection(&collection)?;
    let records = state.remote.pull(&collection).await?;
    Ok(Json(records))
}

/// POST /collections/{collection}/records - Upsert one record.
///
/// Responds with the stored copy, which is the incoming record unless the
/// store already held one at least as new.
async fn push_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(record): Json<Value>,
) -> Result<Json<Value>> {
    validate_collection(&collection)?;
    let id = wire::wire_id(&record)
        .ok_or_else(|| AppError::BadRequest("record must have a string id".to_string()))?
        .to_string();

    state.remote.push(&collection, record).await?;

    let stored = state
        .remote
        .get(&collection, &id)
        .ok_or_else(|| AppError::NotFound(format!("{collection}/{id}")))?;
    Ok(Json(stored))
}

/// DELETE /collections/{collection}/records/{id} - Delete one record.
async fn delete_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    validate_collection(&collection)?;
    state.remote.delete(&collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
