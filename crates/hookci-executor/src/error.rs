//! Executor error types.

use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process supervisor already started")]
    AlreadyStarted,

    #[error("process supervisor is not running")]
    NotStarted,

    #[error("process {0} is already registered")]
    DuplicateProcess(String),

    #[error("unknown process: {0}")]
    UnknownProcess(String),

    #[error("poll interval {0:?} is below the minimum")]
    InvalidPollInterval(Duration),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SupervisorError> for hookci_core::Error {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::DuplicateProcess(_) => hookci_core::Error::Conflict(err.to_string()),
            SupervisorError::UnknownProcess(_) => hookci_core::Error::NotFound(err.to_string()),
            _ => hookci_core::Error::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("no build script found (tried {0})")]
    NoBuildScript(String),

    #[error("override path escapes the workspace: {0}")]
    UnsafeOverride(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("build client error: {0}")]
    Client(#[from] hookci_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
