//! In-process build queue drained by a fixed pool of workers.

use hookci_core::{BuildClient, BuildId, BuildStatus, Error, Result};
use hookci_db::{BuildRepo, DbError, Store};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::tokens::TokenRegistry;
use crate::worker::Worker;
use crate::{LocalRunner, SchedulerError, SchedulerResult};

#[derive(Default)]
pub(crate) struct QueueState {
    pending: VecDeque<BuildId>,
    active: TokenRegistry,
}

pub(crate) struct QueueShared {
    pub store: Arc<dyn Store>,
    pub runner: Arc<LocalRunner>,
    pub client: Arc<dyn BuildClient>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl QueueShared {
    /// Wait for a pending build and take it, registering its cancellation
    /// token in the same critical section.
    pub async fn next(&self) -> (BuildId, u64, CancellationToken) {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(build_id) = state.pending.pop_front() {
                    let (ticket, token) = state.active.register(build_id);
                    return (build_id, ticket, token);
                }
            }
            notified.await;
        }
    }

    /// Add a build to the pending set. Returns false if it was already pending.
    pub async fn push(&self, build_id: BuildId) -> bool {
        let mut state = self.state.lock().await;
        if state.pending.contains(&build_id) {
            return false;
        }
        state.pending.push_back(build_id);
        drop(state);

        self.notify.notify_one();
        true
    }

    pub async fn finish(&self, build_id: BuildId, ticket: u64) {
        self.state.lock().await.active.release(build_id, ticket);
    }
}

struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// FIFO set of pending builds consumed by `n` worker tasks.
pub struct BuildQueue {
    shared: Arc<QueueShared>,
    pool: Mutex<Option<WorkerPool>>,
}

impl BuildQueue {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<LocalRunner>,
        client: Arc<dyn BuildClient>,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                store,
                runner,
                client,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
            pool: Mutex::new(None),
        }
    }

    /// Add a build to the pending set. Returns false if it was already pending.
    pub async fn enqueue(&self, build_id: BuildId) -> bool {
        let added = self.shared.push(build_id).await;
        if added {
            info!(build_id = %build_id, "Build enqueued");
        }
        added
    }

    /// Cancel a build.
    ///
    /// A pending build is dropped from the queue and marked Stopped right
    /// away. An executing build is marked Stopped and its pipeline is
    /// signalled to abort. A build that is Queued in the store but not
    /// pending here is marked Stopped as well.
    pub async fn terminate(&self, build_id: BuildId) -> Result<()> {
        let mut state = self.shared.state.lock().await;

        if let Some(pos) = state.pending.iter().position(|id| *id == build_id) {
            state.pending.remove(pos);
            drop(state);
            self.shared
                .store
                .transition(build_id, BuildStatus::Stopped)
                .await?;
            info!(build_id = %build_id, "Pending build stopped");
            return Ok(());
        }

        if let Some(token) = state.active.get(build_id) {
            drop(state);
            match self
                .shared
                .store
                .transition(build_id, BuildStatus::Stopped)
                .await
            {
                Ok(_) => {}
                Err(DbError::InvalidTransition { .. }) => {
                    return Err(Error::BuildNotRunning(build_id));
                }
                Err(e) => return Err(e.into()),
            }
            token.cancel();
            info!(build_id = %build_id, "Running build cancelled");
            return Ok(());
        }
        drop(state);

        let build = self.shared.store.get_build(build_id).await?;
        if build.status == BuildStatus::Queued {
            self.shared
                .store
                .transition(build_id, BuildStatus::Stopped)
                .await?;
            info!(build_id = %build_id, "Queued build stopped");
            return Ok(());
        }
        Err(Error::BuildNotRunning(build_id))
    }

    /// Launch `workers` worker tasks.
    pub async fn start(&self, workers: usize) -> SchedulerResult<()> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|id| {
                let worker = Worker::new(id, self.shared.clone(), shutdown.clone());
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "Build queue started");

        *pool = Some(WorkerPool { shutdown, handles });
        Ok(())
    }

    /// Signal every worker and every executing build, then wait for the
    /// workers to exit.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let pool = self
            .pool
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::NotRunning)?;

        self.shared.state.lock().await.active.cancel_all();
        pool.shutdown.cancel();

        for handle in pool.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Build queue stopped");
        Ok(())
    }

    /// Requeue builds left Building by a previous process and enqueue every
    /// Queued build, oldest first. Returns how many builds were enqueued.
    pub async fn recover(&self) -> SchedulerResult<usize> {
        let store = &self.shared.store;
        for build in store.list_by_status(BuildStatus::Building).await? {
            if store.requeue_orphaned(build.id).await?.is_some() {
                warn!(build_id = %build.id, "Requeued orphaned build");
            }
        }

        let mut count = 0;
        for build in store.list_by_status(BuildStatus::Queued).await? {
            if self.enqueue(build.id).await {
                count += 1;
            }
        }
        info!(count, "Recovered queued builds");
        Ok(count)
    }

    pub async fn pending(&self) -> Vec<BuildId> {
        self.shared.state.lock().await.pending.iter().copied().collect()
    }

    pub async fn is_active(&self, build_id: BuildId) -> bool {
        self.shared.state.lock().await.active.contains(build_id)
    }

    pub async fn active_builds(&self) -> usize {
        self.shared.state.lock().await.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{context, repository};
    use crate::{BuildContext, LocalBuildClient};
    use async_trait::async_trait;
    use hookci_core::{Build, NULL_COMMIT_SHA, NewRepository, Repository, RepositoryId};
    use hookci_db::{DbResult, MemoryStore, RepositoryRepo};
    use hookci_executor::{BuildPipeline, PipelineSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue(ctx: &BuildContext) -> BuildQueue {
        let pipeline = Arc::new(BuildPipeline::new(PipelineSettings::default()));
        let runner = Arc::new(LocalRunner::new(ctx.clone(), pipeline));
        let client: Arc<dyn BuildClient> = Arc::new(LocalBuildClient::new(ctx.clone()));
        BuildQueue::new(ctx.store.clone(), runner, client)
    }

    async fn queued_build(ctx: &BuildContext) -> Build {
        let repo = repository(ctx, "acme/widget", "/nonexistent/widget").await;
        ctx.store
            .create_build(repo.id, "refs/heads/main", NULL_COMMIT_SHA)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = queue(&ctx);

        assert!(queue.enqueue(BuildId::new(1)).await);
        assert!(!queue.enqueue(BuildId::new(1)).await);
        assert!(queue.enqueue(BuildId::new(2)).await);
        assert!(!queue.enqueue(BuildId::new(1)).await);
        assert_eq!(queue.pending().await, vec![BuildId::new(1), BuildId::new(2)]);
    }

    #[tokio::test]
    async fn test_terminate_pending_build_never_builds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = queue(&ctx);
        let build = queued_build(&ctx).await;

        queue.enqueue(build.id).await;
        queue.terminate(build.id).await.unwrap();

        let build = ctx.store.get_build(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Stopped);
        assert!(build.started_at.is_none());
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_finished_build() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = queue(&ctx);
        let build = queued_build(&ctx).await;
        ctx.store
            .transition(build.id, BuildStatus::Building)
            .await
            .unwrap();
        ctx.store
            .transition(build.id, BuildStatus::Success)
            .await
            .unwrap();

        assert!(matches!(
            queue.terminate(build.id).await,
            Err(Error::BuildNotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = queue(&ctx);

        assert!(matches!(queue.stop().await, Err(SchedulerError::NotRunning)));
        queue.start(2).await.unwrap();
        assert!(matches!(
            queue.start(2).await,
            Err(SchedulerError::AlreadyRunning)
        ));
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_skips_build_no_longer_queued() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = queue(&ctx);
        let build = queued_build(&ctx).await;
        ctx.store
            .transition(build.id, BuildStatus::Stopped)
            .await
            .unwrap();

        queue.enqueue(build.id).await;
        queue.start(1).await.unwrap();
        for _ in 0..100 {
            if queue.pending().await.is_empty() && queue.active_builds().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        queue.stop().await.unwrap();

        let build = ctx.store.get_build(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Stopped);
        assert!(build.started_at.is_none());
        assert!(!dir.path().join("builds/acme/widget/1.log").exists());
    }

    /// Memory store whose first `claim` fails.
    struct FlakyClaimStore {
        inner: MemoryStore,
        claims: AtomicUsize,
    }

    #[async_trait]
    impl BuildRepo for FlakyClaimStore {
        async fn create_build(
            &self,
            repository_id: RepositoryId,
            git_ref: &str,
            commit_sha: &str,
        ) -> DbResult<Build> {
            self.inner.create_build(repository_id, git_ref, commit_sha).await
        }

        async fn get_build(&self, id: BuildId) -> DbResult<Build> {
            self.inner.get_build(id).await
        }

        async fn list_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>> {
            self.inner.list_by_status(status).await
        }

        async fn next_queued(&self) -> DbResult<Option<Build>> {
            self.inner.next_queued().await
        }

        async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Build> {
            self.inner.transition(id, to).await
        }

        async fn claim(&self, id: BuildId) -> DbResult<Option<Build>> {
            if self.claims.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DbError::InvalidData("connection reset".to_string()));
            }
            self.inner.claim(id).await
        }

        async fn set_revision(&self, id: BuildId, git_ref: &str, commit_sha: &str) -> DbResult<()> {
            self.inner.set_revision(id, git_ref, commit_sha).await
        }

        async fn restart(&self, id: BuildId) -> DbResult<Build> {
            self.inner.restart(id).await
        }

        async fn requeue_orphaned(&self, id: BuildId) -> DbResult<Option<Build>> {
            self.inner.requeue_orphaned(id).await
        }

        async fn delete_build(&self, id: BuildId) -> DbResult<Build> {
            self.inner.delete_build(id).await
        }
    }

    #[async_trait]
    impl RepositoryRepo for FlakyClaimStore {
        async fn upsert_repository(&self, repository: NewRepository) -> DbResult<Repository> {
            self.inner.upsert_repository(repository).await
        }

        async fn get_repository(&self, id: RepositoryId) -> DbResult<Repository> {
            self.inner.get_repository(id).await
        }

        async fn get_repository_by_name(&self, name: &str) -> DbResult<Option<Repository>> {
            self.inner.get_repository_by_name(name).await
        }

        async fn list_repositories(&self) -> DbResult<Vec<Repository>> {
            self.inner.list_repositories().await
        }
    }

    #[tokio::test]
    async fn test_failed_claim_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyClaimStore {
            inner: MemoryStore::new(),
            claims: AtomicUsize::new(0),
        });
        let mut ctx = context(dir.path());
        let shared: Arc<dyn Store> = store.clone();
        ctx.store = shared;
        let queue = queue(&ctx);
        let build = queued_build(&ctx).await;

        queue.enqueue(build.id).await;
        queue.start(1).await.unwrap();
        let mut status = BuildStatus::Queued;
        for _ in 0..100 {
            status = ctx.store.get_build(build.id).await.unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        queue.stop().await.unwrap();

        // The clone URL does not exist, so the second attempt fails the build.
        assert_eq!(status, BuildStatus::Error);
        assert_eq!(store.claims.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_recover_requeues_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = queue(&ctx);
        let orphan = queued_build(&ctx).await;
        ctx.store.claim(orphan.id).await.unwrap();
        let queued = queued_build(&ctx).await;

        assert_eq!(queue.recover().await.unwrap(), 2);
        assert_eq!(queue.pending().await, vec![orphan.id, queued.id]);
        assert_eq!(
            ctx.store.get_build(orphan.id).await.unwrap().status,
            BuildStatus::Queued
        );
    }
}
