//! Error types for hookci.

use thiserror::Error;

use crate::BuildId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("ref {git_ref} is not accepted by repository {repository}")]
    RefNotAccepted { repository: String, git_ref: String },

    #[error("build {0} is not running")]
    BuildNotRunning(BuildId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
