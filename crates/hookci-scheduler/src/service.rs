//! Build operations exposed to the HTTP layer.

use hookci_core::{Build, BuildId, BuildStatus, Error, InboundBuildRequest, Repository, Result};
use hookci_db::{BuildRepo, DbError, RepositoryRepo};
use hookci_executor::workspace::{remove_dir_if_exists, remove_file_if_exists};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{BuildContext, Dispatcher};

#[derive(Clone)]
pub struct BuildService {
    ctx: BuildContext,
    dispatcher: Arc<Dispatcher>,
}

impl BuildService {
    pub fn new(ctx: BuildContext, dispatcher: Arc<Dispatcher>) -> Self {
        Self { ctx, dispatcher }
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Create a Queued build for an authenticated request.
    pub async fn submit(&self, request: &InboundBuildRequest) -> Result<Build> {
        request.validate()?;
        let repository = self.repository(&request.repository).await?;
        repository.check_ref(&request.git_ref)?;

        let build = self
            .ctx
            .store
            .create_build(repository.id, &request.git_ref, &request.commit)
            .await?;
        info!(
            build_id = %build.id,
            repository = %repository.name,
            num = build.num,
            git_ref = %build.git_ref,
            commit = %build.commit_sha,
            "Build queued"
        );

        self.dispatcher.submitted(build.id).await;
        Ok(build)
    }

    pub async fn get(&self, build_id: BuildId) -> Result<Build> {
        Ok(self.ctx.store.get_build(build_id).await?)
    }

    pub async fn repository(&self, name: &str) -> Result<Repository> {
        self.ctx
            .store
            .get_repository_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("repository {name}")))
    }

    /// Stop a build that has not finished yet.
    pub async fn cancel(&self, build_id: BuildId) -> Result<()> {
        match self.dispatcher.cancel(build_id).await {
            Err(Error::BuildNotRunning(_)) => {}
            other => return other,
        }

        // Not known to the dispatcher: it may still be waiting in the store.
        match self
            .ctx
            .store
            .transition(build_id, BuildStatus::Stopped)
            .await
        {
            Ok(_) => {
                info!(build_id = %build_id, "Queued build stopped");
                Ok(())
            }
            Err(DbError::InvalidTransition {
                from: BuildStatus::Building,
                ..
            }) => {
                // Picked up in the meantime.
                self.dispatcher.cancel(build_id).await
            }
            Err(DbError::InvalidTransition { .. }) => Err(Error::BuildNotRunning(build_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue a finished build again under the same sequence number.
    pub async fn restart(&self, build_id: BuildId) -> Result<Build> {
        if self.dispatcher.is_running(build_id).await {
            return Err(Error::Conflict(format!("build {build_id} is running")));
        }

        let (_, repository) = self.ctx.load(build_id).await?;
        let build = self.ctx.store.restart(build_id).await?;
        let paths = self.ctx.paths(&repository, &build);
        remove_quietly(build_id, &paths.artifact).await;
        remove_quietly(build_id, &paths.log).await;

        info!(build_id = %build_id, num = build.num, "Build restarted");
        self.dispatcher.submitted(build_id).await;
        Ok(build)
    }

    /// Delete a build record along with its files.
    pub async fn delete(&self, build_id: BuildId) -> Result<Build> {
        let (_, repository) = self.ctx.load(build_id).await?;
        let build = self.ctx.store.delete_build(build_id).await?;
        let paths = self.ctx.paths(&repository, &build);

        remove_quietly(build_id, &paths.artifact).await;
        remove_quietly(build_id, &paths.log).await;
        if let Err(e) = remove_dir_if_exists(&paths.workspace).await {
            warn!(build_id = %build_id, path = %paths.workspace.display(), error = %e, "Failed to remove workspace");
        }

        info!(build_id = %build_id, "Build deleted");
        Ok(build)
    }
}

async fn remove_quietly(build_id: BuildId, path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!(build_id = %build_id, path = %path.display(), error = %e, "Failed to remove file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{context, repository};
    use crate::{
        BuildQueue, LocalBuildClient, LocalBuildManager, LocalRunner, Scheduler, SchedulerSettings,
    };
    use hookci_core::repository::NewRepository;
    use hookci_core::{BuildClient, BuildManager, NULL_COMMIT_SHA};
    use hookci_executor::{BuildPipeline, PipelineSettings};
    use std::time::Duration;

    fn runner(ctx: &BuildContext) -> Arc<LocalRunner> {
        let pipeline = Arc::new(BuildPipeline::new(PipelineSettings::default()));
        Arc::new(LocalRunner::new(ctx.clone(), pipeline))
    }

    // Queue mode with no workers, so builds stay pending.
    fn idle_queue_service(ctx: &BuildContext) -> (BuildService, Arc<Dispatcher>) {
        let client: Arc<dyn BuildClient> = Arc::new(LocalBuildClient::new(ctx.clone()));
        let queue = Arc::new(BuildQueue::new(ctx.store.clone(), runner(ctx), client));
        let dispatcher = Arc::new(Dispatcher::Queue { queue, workers: 1 });
        (BuildService::new(ctx.clone(), dispatcher.clone()), dispatcher)
    }

    fn pending(dispatcher: &Dispatcher) -> &BuildQueue {
        match dispatcher {
            Dispatcher::Queue { queue, .. } => &**queue,
            Dispatcher::Managed { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_submit_enqueues_build() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        repository(&ctx, "acme/widget", "/src/widget").await;
        let (service, dispatcher) = idle_queue_service(&ctx);

        let request = InboundBuildRequest::new("acme/widget", "refs/heads/main");
        let first = service.submit(&request).await.unwrap();
        let second = service.submit(&request).await.unwrap();

        assert_eq!(first.num, 1);
        assert_eq!(second.num, 2);
        assert_eq!(first.status, BuildStatus::Queued);
        assert_eq!(first.commit_sha, NULL_COMMIT_SHA);
        assert_eq!(
            pending(&dispatcher).pending().await,
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.store
            .upsert_repository(NewRepository {
                name: "acme/widget".to_string(),
                clone_url: "/src/widget".to_string(),
                secret: "s3cret".to_string(),
                ref_whitelist: vec!["refs/heads/main".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        let (service, dispatcher) = idle_queue_service(&ctx);

        assert!(matches!(
            service
                .submit(&InboundBuildRequest::new("acme/other", "refs/heads/main"))
                .await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            service
                .submit(&InboundBuildRequest::new("acme/widget", "refs/heads/dev"))
                .await,
            Err(Error::RefNotAccepted { .. })
        ));
        assert!(matches!(
            service
                .submit(&InboundBuildRequest::new("acme/widget", "refs/heads/main").with_commit("xyz"))
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(pending(&dispatcher).pending().await.is_empty());
        assert_eq!(
            service.repository("acme/widget").await.unwrap().build_count,
            0
        );
    }

    #[tokio::test]
    async fn test_cancel_restart_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        repository(&ctx, "acme/widget", "/src/widget").await;
        let (service, dispatcher) = idle_queue_service(&ctx);

        let build = service
            .submit(&InboundBuildRequest::new("acme/widget", "refs/heads/main"))
            .await
            .unwrap();
        assert!(matches!(
            service.restart(build.id).await,
            Err(Error::Conflict(_))
        ));

        service.cancel(build.id).await.unwrap();
        assert_eq!(service.get(build.id).await.unwrap().status, BuildStatus::Stopped);
        assert!(matches!(
            service.cancel(build.id).await,
            Err(Error::BuildNotRunning(_))
        ));

        // Leftovers from the stopped attempt.
        let paths = ctx.paths(&service.repository("acme/widget").await.unwrap(), &build);
        std::fs::create_dir_all(&paths.workspace).unwrap();
        std::fs::write(&paths.artifact, b"zip").unwrap();
        std::fs::write(&paths.log, b"log").unwrap();

        let restarted = service.restart(build.id).await.unwrap();
        assert_eq!(restarted.num, build.num);
        assert_eq!(restarted.status, BuildStatus::Queued);
        assert!(!paths.artifact.exists());
        assert!(!paths.log.exists());
        assert_eq!(pending(&dispatcher).pending().await, vec![build.id]);

        service.cancel(build.id).await.unwrap();
        service.delete(build.id).await.unwrap();
        assert!(!paths.workspace.exists());
        assert!(matches!(service.get(build.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_refused_while_building() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        repository(&ctx, "acme/widget", "/src/widget").await;
        let (service, _) = idle_queue_service(&ctx);

        let build = service
            .submit(&InboundBuildRequest::new("acme/widget", "refs/heads/main"))
            .await
            .unwrap();
        ctx.store.claim(build.id).await.unwrap();

        assert!(matches!(
            service.delete(build.id).await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(
            service.get(build.id).await.unwrap().status,
            BuildStatus::Building
        );
    }

    #[tokio::test]
    async fn test_cancel_unclaimed_build_in_scheduler_mode() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        repository(&ctx, "acme/widget", "/src/widget").await;

        let client: Arc<dyn BuildClient> = Arc::new(LocalBuildClient::new(ctx.clone()));
        let manager: Arc<dyn BuildManager> = Arc::new(LocalBuildManager::new(runner(&ctx)));
        let scheduler = Arc::new(Scheduler::new(
            ctx.clone(),
            manager.clone(),
            client.clone(),
            SchedulerSettings {
                max_builds: 1,
                poll_interval: Duration::from_secs(60),
            },
        ));
        let dispatcher = Arc::new(Dispatcher::Managed {
            scheduler,
            manager,
            client,
        });
        let service = BuildService::new(ctx.clone(), dispatcher);

        let build = service
            .submit(&InboundBuildRequest::new("acme/widget", "refs/heads/main"))
            .await
            .unwrap();
        service.cancel(build.id).await.unwrap();

        let build = service.get(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Stopped);
        assert!(build.started_at.is_none());
    }
}
