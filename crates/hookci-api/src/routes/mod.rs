//! API routes.

pub mod builds;
pub mod health;
pub mod hooks;
pub mod runner;

use crate::AppState;
use axum::Router;

/// Build the main router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/builds", builds::router())
        .nest("/api/internal", runner::router())
        .nest("/hooks", hooks::router())
        .merge(health::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::AppState;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, Response, StatusCode};
    use hookci_config::SystemConfig;
    use hookci_core::NewRepository;
    use hookci_db::{MemoryStore, RepositoryRepo, Store};
    use hookci_scheduler::{BuildContext, BuildService, Dispatcher};
    use std::path::Path;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub const SECRET: &str = "s3cret";

    /// A service in queue mode whose workers are never started, so
    /// submitted builds stay Queued.
    pub async fn app(root: &Path) -> (Router, AppState) {
        let config = SystemConfig {
            build_dir: root.join("builds"),
            override_dir: root.join("overrides"),
            token_secret: "token-secret".to_string(),
            ..Default::default()
        };
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .upsert_repository(NewRepository {
                name: "acme/widget".to_string(),
                clone_url: "/src/widget".to_string(),
                secret: SECRET.to_string(),
                ref_whitelist: vec!["refs/heads/main".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        let ctx = BuildContext::from_config(store, &config);
        let dispatcher = Arc::new(Dispatcher::from_config(&ctx, &config));
        let state = AppState::new(BuildService::new(ctx, dispatcher));
        (super::router(state.clone()), state)
    }

    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response: Response<Body> = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    pub fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }
}
