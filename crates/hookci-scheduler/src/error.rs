//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error(transparent)]
    Core(#[from] hookci_core::Error),

    #[error(transparent)]
    Db(#[from] hookci_db::DbError),
}

impl From<SchedulerError> for hookci_core::Error {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Core(e) => e,
            SchedulerError::Db(e) => e.into(),
            other => hookci_core::Error::Conflict(other.to_string()),
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
