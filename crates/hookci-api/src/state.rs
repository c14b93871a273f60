//! Application state.

use hookci_scheduler::{BuildService, LocalBuildClient};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: BuildService,
    /// Serves the runner callback API.
    pub build_client: Arc<LocalBuildClient>,
}

impl AppState {
    pub fn new(service: BuildService) -> Self {
        let build_client = Arc::new(LocalBuildClient::new(service.context().clone()));
        Self {
            service,
            build_client,
        }
    }

    pub fn token_secret(&self) -> &str {
        &self.service.context().token_secret
    }
}
