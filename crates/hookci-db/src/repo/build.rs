//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookci_core::{Build, BuildId, BuildStatus, RepositoryId};
use serde::{Deserialize, Serialize};

use super::PgStore;
use crate::{DbError, DbResult};

/// A build record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildRecord {
    pub id: i64,
    pub repository_id: i64,
    pub num: i64,
    pub git_ref: String,
    pub commit_sha: String,
    pub status: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<BuildRecord> for Build {
    type Error = DbError;

    fn try_from(record: BuildRecord) -> DbResult<Self> {
        let status = record
            .status
            .parse()
            .map_err(|_| DbError::InvalidData(format!("build status {:?}", record.status)))?;
        Ok(Build {
            id: BuildId::new(record.id),
            repository_id: RepositoryId::new(record.repository_id),
            num: record.num,
            git_ref: record.git_ref,
            commit_sha: record.commit_sha,
            status,
            queued_at: record.queued_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Create a Queued build, allocating the repository's next sequence number
    /// in the same transaction.
    async fn create_build(
        &self,
        repository_id: RepositoryId,
        git_ref: &str,
        commit_sha: &str,
    ) -> DbResult<Build>;

    async fn get_build(&self, id: BuildId) -> DbResult<Build>;

    /// Builds in `status`, oldest first.
    async fn list_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>>;

    /// Oldest Queued build, if any.
    async fn next_queued(&self) -> DbResult<Option<Build>>;

    /// Move a build along the state machine, stamping start and finish times.
    async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Build>;

    /// Queued -> Building as a compare-and-set. `None` when the build was no
    /// longer Queued.
    async fn claim(&self, id: BuildId) -> DbResult<Option<Build>>;

    /// Record the resolved commit of a Building build; an empty `git_ref`
    /// keeps the stored ref.
    async fn set_revision(&self, id: BuildId, git_ref: &str, commit_sha: &str) -> DbResult<()>;

    /// Reset a terminal build to Queued, keeping its sequence number.
    async fn restart(&self, id: BuildId) -> DbResult<Build>;

    /// Building -> Queued for builds whose executor went away.
    async fn requeue_orphaned(&self, id: BuildId) -> DbResult<Option<Build>>;

    /// Remove a build that is not Building.
    async fn delete_build(&self, id: BuildId) -> DbResult<Build>;
}

fn not_found(id: BuildId) -> DbError {
    DbError::NotFound(format!("build {}", id))
}

const SELECT_BUILD: &str = "SELECT * FROM builds WHERE id = $1";

#[async_trait]
impl BuildRepo for PgStore {
    async fn create_build(
        &self,
        repository_id: RepositoryId,
        git_ref: &str,
        commit_sha: &str,
    ) -> DbResult<Build> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            WITH bumped AS (
                UPDATE repositories SET build_count = build_count + 1
                WHERE id = $1
                RETURNING id, build_count
            )
            INSERT INTO builds (repository_id, num, git_ref, commit_sha, status, queued_at)
            SELECT id, build_count, $2, $3, 'queued', NOW() FROM bumped
            RETURNING *
            "#,
        )
        .bind(repository_id.get())
        .bind(git_ref)
        .bind(commit_sha)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("repository {}", repository_id)))?;
        record.try_into()
    }

    async fn get_build(&self, id: BuildId) -> DbResult<Build> {
        sqlx::query_as::<_, BuildRecord>(SELECT_BUILD)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))?
            .try_into()
    }

    async fn list_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE status = $1 ORDER BY queued_at, id",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(Build::try_from).collect()
    }

    async fn next_queued(&self) -> DbResult<Option<Build>> {
        let record = sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE status = 'queued' ORDER BY queued_at, id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        record.map(Build::try_from).transpose()
    }

    async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Build> {
        let mut tx = self.pool.begin().await?;

        let current: Build = sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE id = $1 FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(id))?
        .try_into()?;

        if !current.status.can_transition_to(to) {
            return Err(DbError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            UPDATE builds SET
                status = $2,
                started_at = CASE WHEN $2 = 'building' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $3 THEN NOW() ELSE finished_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.get())
        .bind(to.as_str())
        .bind(to.is_terminal())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        record.try_into()
    }

    async fn claim(&self, id: BuildId) -> DbResult<Option<Build>> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            UPDATE builds SET status = 'building', started_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        record.map(Build::try_from).transpose()
    }

    async fn set_revision(&self, id: BuildId, git_ref: &str, commit_sha: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE builds SET
                commit_sha = $3,
                git_ref = CASE WHEN $2 = '' THEN git_ref ELSE $2 END
            WHERE id = $1 AND status = 'building'
            "#,
        )
        .bind(id.get())
        .bind(git_ref)
        .bind(commit_sha)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_build(id).await?;
            return Err(DbError::NotBuilding {
                id,
                status: current.status,
            });
        }
        Ok(())
    }

    async fn restart(&self, id: BuildId) -> DbResult<Build> {
        let mut tx = self.pool.begin().await?;

        let current: Build = sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE id = $1 FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(id))?
        .try_into()?;

        if !current.status.is_terminal() {
            return Err(DbError::InvalidTransition {
                id,
                from: current.status,
                to: BuildStatus::Queued,
            });
        }

        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            UPDATE builds SET
                status = 'queued', queued_at = NOW(), started_at = NULL, finished_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.get())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        record.try_into()
    }

    async fn requeue_orphaned(&self, id: BuildId) -> DbResult<Option<Build>> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            UPDATE builds SET status = 'queued', started_at = NULL
            WHERE id = $1 AND status = 'building'
            RETURNING *
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        record.map(Build::try_from).transpose()
    }

    async fn delete_build(&self, id: BuildId) -> DbResult<Build> {
        let mut tx = self.pool.begin().await?;

        let current: Build = sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE id = $1 FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(id))?
        .try_into()?;

        if current.status == BuildStatus::Building {
            return Err(DbError::BuildInProgress(id));
        }

        sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(current)
    }
}
