//! Repository traits and implementations.

pub mod build;
pub mod repository;

pub use build::{BuildRecord, BuildRepo};
pub use repository::{RepositoryRecord, RepositoryRepo};

use sqlx::PgPool;

/// Everything the orchestrator persists.
pub trait Store: BuildRepo + RepositoryRepo {}

impl<T: BuildRepo + RepositoryRepo> Store for T {}

/// PostgreSQL implementation of the store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
