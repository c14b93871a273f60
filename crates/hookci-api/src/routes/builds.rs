//! Operator endpoints for builds.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use hookci_core::{Build, BuildId};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::hooks;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(hooks::submit))
        .route("/{id}", get(get_build).delete(delete_build))
        .route("/{id}/cancel", post(cancel_build))
        .route("/{id}/restart", post(restart_build))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<Build>, ApiError> {
    Ok(Json(state.service.get(id).await?))
}

async fn cancel_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<Build>, ApiError> {
    state.service.cancel(id).await?;
    Ok(Json(state.service.get(id).await?))
}

async fn restart_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<Build>, ApiError> {
    Ok(Json(state.service.restart(id).await?))
}

async fn delete_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{SECRET, app, json, send};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let body = format!(
            r#"{{"repository": "acme/widget", "ref": "refs/heads/main", "secret": "{SECRET}"}}"#
        );
        let (status, response) = send(&app, post("/api/v1/builds", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json(&response)["id"].as_i64().unwrap();

        let (status, response) = send(&app, empty("GET", &format!("/api/v1/builds/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&response)["status"], "queued");

        // Only finished builds can be restarted.
        let (status, _) =
            send(&app, empty("POST", &format!("/api/v1/builds/{id}/restart"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, response) =
            send(&app, empty("POST", &format!("/api/v1/builds/{id}/cancel"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&response)["status"], "stopped");

        let (status, _) = send(&app, empty("POST", &format!("/api/v1/builds/{id}/cancel"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, response) =
            send(&app, empty("POST", &format!("/api/v1/builds/{id}/restart"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&response)["status"], "queued");
        assert_eq!(json(&response)["num"], 1);

        send(&app, empty("POST", &format!("/api/v1/builds/{id}/cancel"))).await;
        let (status, _) = send(&app, empty("DELETE", &format!("/api/v1/builds/{id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, response) = send(&app, empty("GET", &format!("/api/v1/builds/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json(&response)["error"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_build_id() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let (status, _) = send(&app, empty("GET", "/api/v1/builds/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
