//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use hookci_db::RepositoryRepo;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once the store answers.
async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let repositories = state
        .service
        .context()
        .store
        .list_repositories()
        .await?
        .len();
    Ok(Json(json!({
        "status": "ready",
        "dispatcher": state.service.dispatcher().name(),
        "repositories": repositories,
    })))
}
