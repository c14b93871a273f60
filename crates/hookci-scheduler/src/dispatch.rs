//! The dispatch strategy chosen at start-up.

use hookci_config::{DispatchMode, SystemConfig};
use hookci_core::{BuildClient, BuildId, BuildManager, Result};
use hookci_executor::BuildPipeline;
use std::sync::Arc;
use tracing::info;

use crate::{
    BuildContext, BuildQueue, HostBuildManager, HostSettings, LocalBuildClient, LocalBuildManager,
    LocalRunner, Scheduler, SchedulerResult, SchedulerSettings, pipeline_settings,
};

pub enum Dispatcher {
    /// In-process queue with a fixed worker pool.
    Queue {
        queue: Arc<BuildQueue>,
        workers: usize,
    },
    /// Store-polling scheduler feeding a build manager.
    Managed {
        scheduler: Arc<Scheduler>,
        manager: Arc<dyn BuildManager>,
        client: Arc<dyn BuildClient>,
    },
}

impl Dispatcher {
    pub fn from_config(ctx: &BuildContext, config: &SystemConfig) -> Self {
        let client: Arc<dyn BuildClient> = Arc::new(LocalBuildClient::new(ctx.clone()));
        let runner = || {
            let pipeline = Arc::new(BuildPipeline::new(pipeline_settings(config)));
            Arc::new(LocalRunner::new(ctx.clone(), pipeline))
        };

        let manager: Arc<dyn BuildManager> = match config.dispatch {
            DispatchMode::Queue => {
                return Dispatcher::Queue {
                    queue: Arc::new(BuildQueue::new(ctx.store.clone(), runner(), client)),
                    workers: config.parallel_builds,
                };
            }
            DispatchMode::Local => Arc::new(LocalBuildManager::new(runner())),
            DispatchMode::Host => Arc::new(HostBuildManager::new(
                ctx.clone(),
                HostSettings::from_config(config),
            )),
        };

        let scheduler = Arc::new(Scheduler::new(
            ctx.clone(),
            manager.clone(),
            client.clone(),
            SchedulerSettings {
                max_builds: config.parallel_builds,
                poll_interval: config.scheduler_poll,
            },
        ));
        Dispatcher::Managed {
            scheduler,
            manager,
            client,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dispatcher::Queue { .. } => "queue",
            Dispatcher::Managed { manager, .. } => manager.name(),
        }
    }

    pub async fn start(&self) -> SchedulerResult<()> {
        match self {
            Dispatcher::Queue { queue, workers } => {
                queue.recover().await?;
                queue.start(*workers).await
            }
            Dispatcher::Managed { scheduler, .. } => scheduler.start().await,
        }
    }

    /// Stop taking new builds. With `cancel_running`, executing builds are
    /// stopped; otherwise managers let them finish. The queue always stops
    /// its workers' builds.
    pub async fn shutdown(&self, cancel_running: bool) -> SchedulerResult<()> {
        info!(dispatcher = self.name(), cancel_running, "Shutting down dispatcher");
        match self {
            Dispatcher::Queue { queue, .. } => queue.stop().await,
            Dispatcher::Managed {
                scheduler, manager, ..
            } => {
                scheduler.stop().await?;
                manager.shutdown(cancel_running).await?;
                Ok(())
            }
        }
    }

    /// A build was created or restarted.
    pub async fn submitted(&self, build_id: BuildId) {
        match self {
            Dispatcher::Queue { queue, .. } => {
                queue.enqueue(build_id).await;
            }
            Dispatcher::Managed { scheduler, .. } => scheduler.notify(),
        }
    }

    /// Cancel an executing (or, in queue mode, pending) build.
    pub async fn cancel(&self, build_id: BuildId) -> Result<()> {
        match self {
            Dispatcher::Queue { queue, .. } => queue.terminate(build_id).await,
            Dispatcher::Managed {
                manager, client, ..
            } => manager.cancel_build(build_id, client.clone()).await,
        }
    }

    pub async fn is_running(&self, build_id: BuildId) -> bool {
        match self {
            Dispatcher::Queue { queue, .. } => queue.is_active(build_id).await,
            Dispatcher::Managed { manager, .. } => manager.is_running(build_id).await,
        }
    }
}
