//! Build manager that runs the pipeline as a task in the server process.

use async_trait::async_trait;
use futures::FutureExt;
use hookci_core::{BuildClient, BuildData, BuildId, BuildManager, BuildStatus, Error, Result};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::LocalRunner;
use crate::tokens::TokenRegistry;

pub struct LocalBuildManager {
    runner: Arc<LocalRunner>,
    tokens: Arc<Mutex<TokenRegistry>>,
    tasks: Mutex<JoinSet<()>>,
}

impl LocalBuildManager {
    pub fn new(runner: Arc<LocalRunner>) -> Self {
        Self {
            runner,
            tokens: Arc::new(Mutex::new(TokenRegistry::default())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }
}

#[async_trait]
impl BuildManager for LocalBuildManager {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self, cancel_running: bool) -> Result<()> {
        if cancel_running {
            self.tokens.lock().await.cancel_all();
        }

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Build task failed");
            }
        }
        info!(manager = self.name(), "Build manager shut down");
        Ok(())
    }

    async fn start_build(&self, data: BuildData, client: Arc<dyn BuildClient>) -> Result<()> {
        let build_id = data.build_id;
        let (ticket, token) = {
            let mut tokens = self.tokens.lock().await;
            if tokens.contains(build_id) {
                return Err(Error::Conflict(format!("build {build_id} is already running")));
            }
            tokens.register(build_id)
        };

        let runner = self.runner.clone();
        let tokens = self.tokens.clone();
        let mut tasks = self.tasks.lock().await;
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let run = runner.execute(build_id, client.as_ref(), &token);
            if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                error!(build_id = %build_id, "Build runner panicked");
                let status = if token.is_cancelled() {
                    BuildStatus::Stopped
                } else {
                    BuildStatus::Error
                };
                if let Err(e) = client.set_status(build_id, status).await {
                    warn!(build_id = %build_id, error = %e, "Failed to record build failure");
                }
            }
            tokens.lock().await.release(build_id, ticket);
        });

        info!(build_id = %build_id, "Build started");
        Ok(())
    }

    async fn cancel_build(&self, build_id: BuildId, client: Arc<dyn BuildClient>) -> Result<()> {
        let token = self
            .tokens
            .lock()
            .await
            .get(build_id)
            .ok_or(Error::BuildNotRunning(build_id))?;

        match client.set_status(build_id, BuildStatus::Stopped).await {
            Ok(()) => {}
            Err(Error::Conflict(_)) => return Err(Error::BuildNotRunning(build_id)),
            Err(e) => return Err(e),
        }
        token.cancel();
        info!(build_id = %build_id, "Build cancelled");
        Ok(())
    }

    async fn is_running(&self, build_id: BuildId) -> bool {
        self.tokens.lock().await.contains(build_id)
    }

    async fn active_builds(&self) -> usize {
        self.tokens.lock().await.len()
    }
}
