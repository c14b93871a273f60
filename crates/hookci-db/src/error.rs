//! Database error types.

use hookci_core::{BuildId, BuildStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("build {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: BuildId,
        from: BuildStatus,
        to: BuildStatus,
    },

    #[error("build {0} is in progress")]
    BuildInProgress(BuildId),

    #[error("build {id} is {status}, not building")]
    NotBuilding { id: BuildId, status: BuildStatus },

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<DbError> for hookci_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => hookci_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => hookci_core::Error::Conflict(msg),
            DbError::InvalidTransition { .. } | DbError::BuildInProgress(_) => {
                hookci_core::Error::Conflict(err.to_string())
            }
            DbError::NotBuilding { id, .. } => hookci_core::Error::BuildNotRunning(id),
            _ => hookci_core::Error::Internal(err.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
