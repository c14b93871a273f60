//! The reporting channel a running build uses to talk back to the server.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BuildId, BuildStatus, Result};

/// Status, revision and override access for one running build.
///
/// Implemented in-process against the store, and remotely over the runner
/// callback API for builds executed by a spawned runner.
#[async_trait]
pub trait BuildClient: Send + Sync {
    async fn get_status(&self, build_id: BuildId) -> Result<BuildStatus>;

    /// Move the build to `status`. Fails with `Error::Conflict` when the build
    /// already reached a terminal state.
    async fn set_status(&self, build_id: BuildId, status: BuildStatus) -> Result<()>;

    /// Persist the resolved commit and fully-qualified ref. An empty `git_ref`
    /// leaves the stored ref untouched.
    async fn set_revision_info(&self, build_id: BuildId, git_ref: &str, commit_sha: &str)
    -> Result<()>;

    async fn start_section(&self, build_id: BuildId, description: &str) -> Result<()>;

    async fn append_output(&self, build_id: BuildId, data: Bytes) -> Result<()>;

    /// Relative paths of every override file for the build's repository.
    async fn list_overrides(&self, build_id: BuildId) -> Result<Vec<String>>;

    async fn get_override(&self, build_id: BuildId, filename: &str) -> Result<Bytes>;
}
