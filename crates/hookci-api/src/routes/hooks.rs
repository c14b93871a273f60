//! Inbound build hook.
//!
//! The caller proves it knows the repository secret either with an
//! `X-Hub-Signature-256: sha256=<hmac>` header over the raw body or with a
//! `secret` field in the JSON body.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hookci_core::secret::{verify_secret, verify_signature};
use hookci_core::{Build, InboundBuildRequest};
use serde::Deserialize;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

pub fn router() -> Router<AppState> {
    Router::new().route("/build", post(submit))
}

#[derive(Debug, Deserialize)]
struct HookRequest {
    #[serde(flatten)]
    request: InboundBuildRequest,
    #[serde(default)]
    secret: Option<String>,
}

/// Authenticate and queue a build.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Build>), ApiError> {
    let hook: HookRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
    let repository = state.service.repository(&hook.request.repository).await?;

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let authenticated = match (signature, hook.secret.as_deref()) {
        (Some(signature), _) => verify_signature(&repository.secret, &body, Some(signature)),
        (None, Some(secret)) => verify_secret(&repository.secret, secret),
        (None, None) => false,
    };
    if !authenticated {
        warn!(repository = %repository.name, "Rejected build request with bad credentials");
        return Err(ApiError::Unauthorized(format!(
            "invalid credentials for repository {}",
            repository.name
        )));
    }

    info!(
        repository = %repository.name,
        git_ref = %hook.request.git_ref,
        commit = %hook.request.commit,
        "Received build request"
    );
    let build = state.service.submit(&hook.request).await?;
    Ok((StatusCode::CREATED, Json(build)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{SECRET, app, json, send};
    use axum::body::Body;
    use axum::http::Request;
    use hookci_core::repository::NewRepository;
    use hookci_core::secret::sign;
    use hookci_db::RepositoryRepo;

    fn hook(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut request = Request::post("/hooks/build").header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_secret_field() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let body = format!(
            r#"{{"repository": "acme/widget", "ref": "refs/heads/main", "secret": "{SECRET}"}}"#
        );
        let (status, response) = send(&app, hook(&body, None)).await;
        assert_eq!(status, StatusCode::CREATED);
        let build = json(&response);
        assert_eq!(build["num"], 1);
        assert_eq!(build["status"], "queued");
        assert_eq!(build["commit_sha"], hookci_core::NULL_COMMIT_SHA);

        let body = r#"{"repository": "acme/widget", "ref": "refs/heads/main", "secret": "nope"}"#;
        let (status, _) = send(&app, hook(body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let body = r#"{"repository": "acme/widget", "ref": "refs/heads/main"}"#;
        let (status, _) = send(&app, hook(body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_repository_secret_never_matches() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;
        state
            .service
            .context()
            .store
            .upsert_repository(NewRepository {
                name: "acme/open".to_string(),
                clone_url: "/src/open".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let body = r#"{"repository": "acme/open", "ref": "refs/heads/main", "secret": ""}"#;
        let (status, _) = send(&app, hook(body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signature_header() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;
        let body = r#"{"repository": "acme/widget", "ref": "refs/heads/main", "commit": "9fceb02d0ae598e95dc970b74767f19372d61af8"}"#;

        let (status, response) = send(&app, hook(body, Some(&sign(SECRET, body.as_bytes())))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            json(&response)["commit_sha"],
            "9fceb02d0ae598e95dc970b74767f19372d61af8"
        );

        let (status, _) = send(&app, hook(body, Some(&sign("other", body.as_bytes())))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;

        let (status, _) = send(&app, hook("not json", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = format!(r#"{{"repository": "acme/other", "ref": "main", "secret": "{SECRET}"}}"#);
        let (status, _) = send(&app, hook(&body, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = format!(
            r#"{{"repository": "acme/widget", "ref": "refs/heads/dev", "secret": "{SECRET}"}}"#
        );
        let (status, response) = send(&app, hook(&body, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&response)["error"].as_str().unwrap().contains("refs/heads/dev"));

        let body = format!(
            r#"{{"repository": "acme/widget", "ref": "refs/heads/main", "commit": "abc", "secret": "{SECRET}"}}"#
        );
        let (status, _) = send(&app, hook(&body, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let repository = state.service.repository("acme/widget").await.unwrap();
        assert_eq!(repository.build_count, 0);
    }
}
