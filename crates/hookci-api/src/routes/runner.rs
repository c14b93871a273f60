//! Callback API for build runners.
//!
//! Every request carries the build token issued for that build as a bearer
//! token, and is accepted only while the build is Building.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use hookci_core::{BuildClient, BuildId, BuildStatus, BuildToken};
use hookci_scheduler::client::{RevisionBody, SectionBody, StatusBody};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/build/{id}/status", get(get_status).post(set_status))
        .route("/build/{id}/revision-info", post(set_revision_info))
        .route("/build/{id}/section", put(start_section))
        .route("/build/{id}/output/append", post(append_output))
        .route("/build/{id}/overrides", get(list_overrides))
        .route("/build/{id}/overrides/{*filename}", get(get_override))
}

async fn authorize(state: &AppState, headers: &HeaderMap, build_id: BuildId) -> Result<(), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing build token".to_string()))?;
    BuildToken::verify(state.token_secret(), token, build_id)?;

    let build = state.service.get(build_id).await?;
    if build.status != BuildStatus::Building {
        return Err(ApiError::Conflict(format!(
            "build {} is {}, not building",
            build_id, build.status
        )));
    }
    Ok(())
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    headers: HeaderMap,
) -> Result<Json<StatusBody>, ApiError> {
    authorize(&state, &headers, id).await?;
    let status = state.build_client.get_status(id).await?;
    Ok(Json(StatusBody { status }))
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, id).await?;
    state.build_client.set_status(id, body.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_revision_info(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    headers: HeaderMap,
    Json(body): Json<RevisionBody>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, id).await?;
    state
        .build_client
        .set_revision_info(id, &body.git_ref, &body.commit_sha)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_section(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    headers: HeaderMap,
    Json(body): Json<SectionBody>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, id).await?;
    state
        .build_client
        .start_section(id, &body.description)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn append_output(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, id).await?;
    state.build_client.append_output(id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_overrides(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    authorize(&state, &headers, id).await?;
    Ok(Json(state.build_client.list_overrides(id).await?))
}

async fn get_override(
    State(state): State<AppState>,
    Path((id, filename)): Path<(BuildId, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, id).await?;
    let content = state.build_client.get_override(id, &filename).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], content))
}
