//! Runs the build pipeline inside the server process.

use hookci_core::{BuildClient, BuildId, BuildStatus, Error, Result};
use hookci_executor::{BuildLog, BuildOutcome, BuildPipeline};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::BuildContext;

/// Executes a build that is already Building and reports its final status.
pub struct LocalRunner {
    ctx: BuildContext,
    pipeline: Arc<BuildPipeline>,
}

impl LocalRunner {
    pub fn new(ctx: BuildContext, pipeline: Arc<BuildPipeline>) -> Self {
        Self { ctx, pipeline }
    }

    /// Run the pipeline and report the final status through `client`.
    ///
    /// A raised `cancel` always yields Stopped. When the status was already
    /// written by someone else (a canceller), that status stands.
    pub async fn execute(
        &self,
        build_id: BuildId,
        client: &dyn BuildClient,
        cancel: &CancellationToken,
    ) -> BuildStatus {
        let status = match self.run(build_id, client, cancel).await {
            Ok(outcome) => outcome.status(),
            Err(e) => {
                error!(build_id = %build_id, error = %e, "Build failed to run");
                BuildStatus::Error
            }
        };
        let status = if cancel.is_cancelled() {
            BuildStatus::Stopped
        } else {
            status
        };

        match client.set_status(build_id, status).await {
            Ok(()) => info!(build_id = %build_id, status = %status, "Build finished"),
            Err(Error::Conflict(reason)) => {
                debug!(build_id = %build_id, reason = %reason, "Build status already final")
            }
            Err(e) => warn!(build_id = %build_id, error = %e, "Failed to report build status"),
        }
        status
    }

    async fn run(
        &self,
        build_id: BuildId,
        client: &dyn BuildClient,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        let (build, repository) = self.ctx.load(build_id).await?;
        let paths = self.ctx.paths(&repository, &build);
        let data = self.ctx.build_data(&build, &repository);
        let log = BuildLog::create(&paths.log)?;

        Ok(self
            .pipeline
            .run(&data, &paths.workspace, &log, client, cancel)
            .await)
    }
}
