//! Build manager trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{BuildClient, BuildData, BuildId, Result};

/// Starts and cancels build executions.
#[async_trait]
pub trait BuildManager: Send + Sync {
    fn name(&self) -> &'static str;

    async fn init(&self) -> Result<()>;

    /// Stop accepting builds. When `cancel_running` is set, running builds are
    /// cancelled and reported Stopped.
    async fn shutdown(&self, cancel_running: bool) -> Result<()>;

    /// Begin executing a build that is already persisted as Building.
    /// Returns once execution has been handed off.
    async fn start_build(&self, data: BuildData, client: Arc<dyn BuildClient>) -> Result<()>;

    /// Cancel a running build and report it Stopped through `client`.
    /// Fails with `Error::BuildNotRunning` when this manager does not own it.
    async fn cancel_build(&self, build_id: BuildId, client: Arc<dyn BuildClient>) -> Result<()>;

    async fn is_running(&self, build_id: BuildId) -> bool;

    async fn active_builds(&self) -> usize;
}
