//! Polls the store for Queued builds and hands them to a build manager.

use hookci_core::{Build, BuildClient, BuildManager, BuildStatus};
use hookci_db::{BuildRepo, RepositoryRepo};
use hookci_executor::BuildLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{BuildContext, SchedulerError, SchedulerResult};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Builds the manager may run at once.
    pub max_builds: usize,
    pub poll_interval: Duration,
}

struct SchedulerInner {
    ctx: BuildContext,
    manager: Arc<dyn BuildManager>,
    client: Arc<dyn BuildClient>,
    settings: SchedulerSettings,
    wake: Notify,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Scheduler {
    /// `client` is the in-process build client handed to the manager for
    /// every build it starts.
    pub fn new(
        ctx: BuildContext,
        manager: Arc<dyn BuildManager>,
        client: Arc<dyn BuildClient>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                ctx,
                manager,
                client,
                settings,
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Initialise the manager, requeue orphaned builds and start polling.
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.inner.manager.init().await?;
        self.inner.recover().await?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().run(shutdown.clone()));
        *task = Some((shutdown, handle));
        info!(manager = self.inner.manager.name(), "Scheduler started");
        Ok(())
    }

    /// Stop polling. The build manager keeps running its builds.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let (shutdown, handle) = self
            .task
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::NotRunning)?;

        shutdown.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task failed");
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Poll right away instead of waiting for the next interval.
    pub fn notify(&self) {
        self.inner.wake.notify_one();
    }

    /// Dispatch as many Queued builds as the manager has room for.
    pub async fn tick(&self) -> SchedulerResult<usize> {
        self.inner.tick().await
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "Scheduler poll failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Building builds the manager does not know about lost their executor.
    async fn recover(&self) -> SchedulerResult<()> {
        let store = &self.ctx.store;
        for build in store.list_by_status(BuildStatus::Building).await? {
            if self.manager.is_running(build.id).await {
                continue;
            }
            if store.requeue_orphaned(build.id).await?.is_some() {
                warn!(build_id = %build.id, "Requeued orphaned build");
            }
        }
        Ok(())
    }

    async fn tick(&self) -> SchedulerResult<usize> {
        let store = &self.ctx.store;
        let mut started = 0;

        while self.manager.active_builds().await < self.settings.max_builds {
            let Some(candidate) = store.next_queued().await? else {
                break;
            };
            // Someone else moved it first; look again.
            let Some(build) = store.claim(candidate.id).await? else {
                debug!(build_id = %candidate.id, "Lost claim race");
                continue;
            };
            self.dispatch(build).await;
            started += 1;
        }
        Ok(started)
    }

    async fn dispatch(&self, build: Build) {
        let build_id = build.id;
        let result = match self.ctx.store.get_repository(build.repository_id).await {
            Ok(repository) => {
                let data = self.ctx.build_data(&build, &repository);
                info!(build_id = %build_id, repository = %repository.name, "Dispatching build");
                let result = self
                    .manager
                    .start_build(data, self.client.clone())
                    .await;
                if let Err(e) = &result {
                    let paths = self.ctx.paths(&repository, &build);
                    match BuildLog::append(&paths.log) {
                        Ok(log) => log.error(format!("Failed to start build: {}", e)),
                        Err(log_err) => warn!(build_id = %build_id, error = %log_err, "Failed to open build log"),
                    }
                }
                result
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            error!(build_id = %build_id, error = %e, "Failed to start build");
            if let Err(e) = self.ctx.store.transition(build_id, BuildStatus::Error).await {
                warn!(build_id = %build_id, error = %e, "Failed to record build failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{context, repository};
    use crate::{LocalBuildClient, LocalBuildManager, LocalRunner};
    use hookci_core::{BuildId, NULL_COMMIT_SHA};
    use hookci_executor::{BuildPipeline, PipelineSettings};

    fn scheduler(ctx: &BuildContext, max_builds: usize) -> Scheduler {
        let pipeline = Arc::new(BuildPipeline::new(PipelineSettings::default()));
        let runner = Arc::new(LocalRunner::new(ctx.clone(), pipeline));
        let manager: Arc<dyn BuildManager> = Arc::new(LocalBuildManager::new(runner));
        let client: Arc<dyn BuildClient> = Arc::new(LocalBuildClient::new(ctx.clone()));
        Scheduler::new(
            ctx.clone(),
            manager,
            client,
            SchedulerSettings {
                max_builds,
                poll_interval: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_start_twice() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let scheduler = scheduler(&ctx, 1);

        assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_requeues_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let repo = repository(&ctx, "acme/widget", "/nonexistent").await;
        let build = ctx
            .store
            .create_build(repo.id, "refs/heads/main", NULL_COMMIT_SHA)
            .await
            .unwrap();
        ctx.store.claim(build.id).await.unwrap();

        let scheduler = scheduler(&ctx, 0);
        scheduler.start().await.unwrap();
        scheduler.stop().await.unwrap();

        assert_eq!(
            ctx.store.get_build(build.id).await.unwrap().status,
            BuildStatus::Queued
        );
    }

    // Single-threaded so dispatched builds cannot finish during the first tick.
    #[tokio::test]
    async fn test_tick_respects_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        // Clone fails fast, so every build ends in Error.
        let repo = repository(&ctx, "acme/widget", "/nonexistent/repo").await;
        let mut ids: Vec<BuildId> = Vec::new();
        for _ in 0..3 {
            let build = ctx
                .store
                .create_build(repo.id, "refs/heads/main", NULL_COMMIT_SHA)
                .await
                .unwrap();
            ids.push(build.id);
        }

        let scheduler = scheduler(&ctx, 2);
        assert_eq!(scheduler.tick().await.unwrap(), 2);
        assert_eq!(
            ctx.store.get_build(ids[2]).await.unwrap().status,
            BuildStatus::Queued
        );

        scheduler.start().await.unwrap();
        for _ in 0..200 {
            let mut done = true;
            for id in &ids {
                if !ctx.store.get_build(*id).await.unwrap().status.is_terminal() {
                    done = false;
                }
            }
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        scheduler.stop().await.unwrap();

        for id in &ids {
            assert_eq!(
                ctx.store.get_build(*id).await.unwrap().status,
                BuildStatus::Error
            );
        }
    }
}
