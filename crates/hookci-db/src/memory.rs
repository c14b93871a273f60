//! In-memory store, used when no database is configured and by tests.

use async_trait::async_trait;
use chrono::Utc;
use hookci_core::repository::NewRepository;
use hookci_core::{Build, BuildId, BuildStatus, Repository, RepositoryId};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::{BuildRepo, DbError, DbResult, RepositoryRepo};

#[derive(Default)]
struct Inner {
    builds: BTreeMap<BuildId, Build>,
    repositories: BTreeMap<RepositoryId, Repository>,
    next_build_id: i64,
    next_repository_id: i64,
}

impl Inner {
    fn build_mut(&mut self, id: BuildId) -> DbResult<&mut Build> {
        self.builds
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    fn sorted_by_queue_order(builds: impl Iterator<Item = Build>) -> Vec<Build> {
        let mut builds: Vec<Build> = builds.collect();
        builds.sort_by_key(|b| (b.queued_at, b.id));
        builds
    }
}

/// A store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn create_build(
        &self,
        repository_id: RepositoryId,
        git_ref: &str,
        commit_sha: &str,
    ) -> DbResult<Build> {
        let mut inner = self.inner.lock().await;

        let repository = inner
            .repositories
            .get_mut(&repository_id)
            .ok_or_else(|| DbError::NotFound(format!("repository {}", repository_id)))?;
        repository.build_count += 1;
        let num = repository.build_count;

        inner.next_build_id += 1;
        let build = Build {
            id: BuildId::new(inner.next_build_id),
            repository_id,
            num,
            git_ref: git_ref.to_string(),
            commit_sha: commit_sha.to_string(),
            status: BuildStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        inner.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get_build(&self, id: BuildId) -> DbResult<Build> {
        let mut inner = self.inner.lock().await;
        Ok(inner.build_mut(id)?.clone())
    }

    async fn list_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>> {
        let inner = self.inner.lock().await;
        Ok(Inner::sorted_by_queue_order(
            inner.builds.values().filter(|b| b.status == status).cloned(),
        ))
    }

    async fn next_queued(&self) -> DbResult<Option<Build>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .builds
            .values()
            .filter(|b| b.status == BuildStatus::Queued)
            .min_by_key(|b| (b.queued_at, b.id))
            .cloned())
    }

    async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Build> {
        let mut inner = self.inner.lock().await;
        let build = inner.build_mut(id)?;

        if !build.status.can_transition_to(to) {
            return Err(DbError::InvalidTransition {
                id,
                from: build.status,
                to,
            });
        }

        build.status = to;
        if to == BuildStatus::Building {
            build.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            build.finished_at = Some(Utc::now());
        }
        Ok(build.clone())
    }

    async fn claim(&self, id: BuildId) -> DbResult<Option<Build>> {
        let mut inner = self.inner.lock().await;
        let build = inner.build_mut(id)?;

        if build.status != BuildStatus::Queued {
            return Ok(None);
        }
        build.status = BuildStatus::Building;
        build.started_at = Some(Utc::now());
        Ok(Some(build.clone()))
    }

    async fn set_revision(&self, id: BuildId, git_ref: &str, commit_sha: &str) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let build = inner.build_mut(id)?;
        if build.status != BuildStatus::Building {
            return Err(DbError::NotBuilding {
                id,
                status: build.status,
            });
        }

        build.commit_sha = commit_sha.to_string();
        if !git_ref.is_empty() {
            build.git_ref = git_ref.to_string();
        }
        Ok(())
    }

    async fn restart(&self, id: BuildId) -> DbResult<Build> {
        let mut inner = self.inner.lock().await;
        let build = inner.build_mut(id)?;

        if !build.status.is_terminal() {
            return Err(DbError::InvalidTransition {
                id,
                from: build.status,
                to: BuildStatus::Queued,
            });
        }

        build.status = BuildStatus::Queued;
        build.queued_at = Utc::now();
        build.started_at = None;
        build.finished_at = None;
        Ok(build.clone())
    }

    async fn requeue_orphaned(&self, id: BuildId) -> DbResult<Option<Build>> {
        let mut inner = self.inner.lock().await;
        let build = inner.build_mut(id)?;

        if build.status != BuildStatus::Building {
            return Ok(None);
        }
        build.status = BuildStatus::Queued;
        build.started_at = None;
        Ok(Some(build.clone()))
    }

    async fn delete_build(&self, id: BuildId) -> DbResult<Build> {
        let mut inner = self.inner.lock().await;

        if inner.build_mut(id)?.status == BuildStatus::Building {
            return Err(DbError::BuildInProgress(id));
        }
        inner
            .builds
            .remove(&id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }
}

#[async_trait]
impl RepositoryRepo for MemoryStore {
    async fn upsert_repository(&self, repository: NewRepository) -> DbResult<Repository> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .repositories
            .values_mut()
            .find(|r| r.name == repository.name)
        {
            existing.clone_url = repository.clone_url;
            existing.secret = repository.secret;
            existing.ssh_identity_file = repository.ssh_identity_file;
            existing.ref_whitelist = repository.ref_whitelist;
            return Ok(existing.clone());
        }

        inner.next_repository_id += 1;
        let created = Repository {
            id: RepositoryId::new(inner.next_repository_id),
            name: repository.name,
            clone_url: repository.clone_url,
            secret: repository.secret,
            ssh_identity_file: repository.ssh_identity_file,
            ref_whitelist: repository.ref_whitelist,
            build_count: 0,
        };
        inner.repositories.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_repository(&self, id: RepositoryId) -> DbResult<Repository> {
        let inner = self.inner.lock().await;
        inner
            .repositories
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("repository {}", id)))
    }

    async fn get_repository_by_name(&self, name: &str) -> DbResult<Option<Repository>> {
        let inner = self.inner.lock().await;
        Ok(inner.repositories.values().find(|r| r.name == name).cloned())
    }

    async fn list_repositories(&self) -> DbResult<Vec<Repository>> {
        let inner = self.inner.lock().await;
        let mut repositories: Vec<Repository> = inner.repositories.values().cloned().collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }
}
