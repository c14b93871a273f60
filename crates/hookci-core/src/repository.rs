//! Repository records and inbound build requests.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::build::{NULL_COMMIT_SHA, is_valid_commit_sha};
use crate::{Error, RepositoryId, Result};

/// A repository that may be built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    /// Unique name, usually `owner/name`.
    pub name: String,
    pub clone_url: String,
    /// Shared secret used to authenticate inbound requests.
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Overrides the global SSH identity file for this repository.
    pub ssh_identity_file: Option<PathBuf>,
    /// Refs that may be built. Empty means every ref is accepted.
    pub ref_whitelist: Vec<String>,
    /// Number of builds created so far; the next build gets `build_count + 1`.
    pub build_count: i64,
}

impl Repository {
    pub fn accepts_ref(&self, git_ref: &str) -> bool {
        self.ref_whitelist.is_empty() || self.ref_whitelist.iter().any(|r| r == git_ref)
    }

    /// Checks that a build for `git_ref` may be created.
    pub fn check_ref(&self, git_ref: &str) -> Result<()> {
        if self.accepts_ref(git_ref) {
            Ok(())
        } else {
            Err(Error::RefNotAccepted {
                repository: self.name.clone(),
                git_ref: git_ref.to_string(),
            })
        }
    }
}

/// Parameters for creating or updating a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRepository {
    pub name: String,
    pub clone_url: String,
    pub secret: String,
    pub ssh_identity_file: Option<PathBuf>,
    pub ref_whitelist: Vec<String>,
}

/// An already-authenticated request to build a repository at a revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundBuildRequest {
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// 40 hex characters, or omitted/all zeros to build whatever `ref` points at.
    #[serde(default = "null_commit")]
    pub commit: String,
}

fn null_commit() -> String {
    NULL_COMMIT_SHA.to_string()
}

impl InboundBuildRequest {
    pub fn new(repository: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            git_ref: git_ref.into(),
            commit: null_commit(),
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = commit.into();
        self
    }

    /// Validates field presence and the commit format.
    pub fn validate(&self) -> Result<()> {
        if self.repository.trim().is_empty() {
            return Err(Error::InvalidInput("repository is required".to_string()));
        }
        if self.git_ref.trim().is_empty() {
            return Err(Error::InvalidInput("ref is required".to_string()));
        }
        if !is_valid_commit_sha(&self.commit) {
            return Err(Error::InvalidInput(format!(
                "commit must be 40 hexadecimal characters, got {:?}",
                self.commit
            )));
        }
        Ok(())
    }
}
