//! Git repository registry.

use async_trait::async_trait;
use hookci_core::repository::NewRepository;
use hookci_core::{Repository, RepositoryId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::PgStore;
use crate::{DbError, DbResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RepositoryRecord {
    pub id: i64,
    pub name: String,
    pub clone_url: String,
    pub secret: String,
    pub ssh_identity_file: Option<String>,
    pub ref_whitelist: Vec<String>,
    pub build_count: i64,
}

impl From<RepositoryRecord> for Repository {
    fn from(record: RepositoryRecord) -> Self {
        Repository {
            id: RepositoryId::new(record.id),
            name: record.name,
            clone_url: record.clone_url,
            secret: record.secret,
            ssh_identity_file: record.ssh_identity_file.map(PathBuf::from),
            ref_whitelist: record.ref_whitelist,
            build_count: record.build_count,
        }
    }
}

#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Insert a repository or update the one with the same name. The build
    /// counter of an existing repository is preserved.
    async fn upsert_repository(&self, repository: NewRepository) -> DbResult<Repository>;
    async fn get_repository(&self, id: RepositoryId) -> DbResult<Repository>;
    async fn get_repository_by_name(&self, name: &str) -> DbResult<Option<Repository>>;
    async fn list_repositories(&self) -> DbResult<Vec<Repository>>;
}

#[async_trait]
impl RepositoryRepo for PgStore {
    async fn upsert_repository(&self, repository: NewRepository) -> DbResult<Repository> {
        let record = sqlx::query_as::<_, RepositoryRecord>(
            r#"
            INSERT INTO repositories (name, clone_url, secret, ssh_identity_file, ref_whitelist)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE SET
                clone_url = EXCLUDED.clone_url,
                secret = EXCLUDED.secret,
                ssh_identity_file = EXCLUDED.ssh_identity_file,
                ref_whitelist = EXCLUDED.ref_whitelist
            RETURNING id, name, clone_url, secret, ssh_identity_file, ref_whitelist, build_count
            "#,
        )
        .bind(&repository.name)
        .bind(&repository.clone_url)
        .bind(&repository.secret)
        .bind(
            repository
                .ssh_identity_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(&repository.ref_whitelist)
        .fetch_one(&self.pool)
        .await?;
        Ok(record.into())
    }

    async fn get_repository(&self, id: RepositoryId) -> DbResult<Repository> {
        let record = sqlx::query_as::<_, RepositoryRecord>(
            r#"
            SELECT id, name, clone_url, secret, ssh_identity_file, ref_whitelist, build_count
            FROM repositories WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("repository {}", id)))?;
        Ok(record.into())
    }

    async fn get_repository_by_name(&self, name: &str) -> DbResult<Option<Repository>> {
        let record = sqlx::query_as::<_, RepositoryRecord>(
            r#"
            SELECT id, name, clone_url, secret, ssh_identity_file, ref_whitelist, build_count
            FROM repositories WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Repository::from))
    }

    async fn list_repositories(&self) -> DbResult<Vec<Repository>> {
        let records = sqlx::query_as::<_, RepositoryRecord>(
            r#"
            SELECT id, name, clone_url, secret, ssh_identity_file, ref_whitelist, build_count
            FROM repositories ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Repository::from).collect())
    }
}
