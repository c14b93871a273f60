//! Snapshot handed to an out-of-process build runner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{BuildId, NULL_COMMIT_SHA, RepositoryId};

/// Everything a runner needs that it cannot derive itself.
///
/// Serialized as a single JSON line on the runner's standard input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildData {
    pub identity_file: Option<PathBuf>,
    pub repository_id: RepositoryId,
    pub repository_name: String,
    pub repository_clone_url: String,
    pub build_id: BuildId,
    pub build_ref: String,
    pub build_commit_sha: String,
    /// Base URL of the callback API used by the remote build client.
    pub build_api_url: String,
    pub build_token: String,
}

impl BuildData {
    /// True when the commit must be resolved from `build_ref` during checkout.
    pub fn is_ref_only(&self) -> bool {
        self.build_commit_sha == NULL_COMMIT_SHA
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}
