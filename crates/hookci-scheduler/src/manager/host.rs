//! Build manager that runs each build in a separate runner process.
//!
//! The runner is started through the process supervisor with the workspace
//! path and candidate script names as arguments, receives its
//! [`BuildData`] as one JSON line on stdin, and writes everything it prints
//! to the build log. Its exit status becomes the build status unless the
//! build was cancelled first.

use async_trait::async_trait;
use hookci_config::SystemConfig;
use hookci_core::{BuildClient, BuildData, BuildId, BuildManager, BuildStatus, Error, Result};
use hookci_executor::{
    BuildLog, OutputMode, PipelineSettings, ProcessConfig, ProcessEventSink, ProcessSupervisor,
    StdinMode, SupervisorError,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::BuildContext;

#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Runner program followed by its leading arguments.
    pub runner_command: Vec<String>,
    pub pipeline: PipelineSettings,
    pub poll_interval: Duration,
}

impl HostSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            runner_command: config.runner_command.clone(),
            pipeline: crate::pipeline_settings(config),
            poll_interval: config.process_poll,
        }
    }

    fn process_config(&self, workspace: &Path, log: &Path) -> Result<ProcessConfig> {
        let (program, leading) = self
            .runner_command
            .split_first()
            .ok_or_else(|| Error::InvalidInput("runner command is empty".to_string()))?;

        let mut config = ProcessConfig::new(program.clone())
            .args(leading.iter().cloned())
            .arg("--git-folder-handling")
            .arg(self.pipeline.git_folder_handling.as_str());
        if self.pipeline.ssh_verbose {
            config = config.arg("--ssh-verbose");
        }
        Ok(config
            .arg(workspace.to_string_lossy())
            .args(self.pipeline.build_scripts.iter().cloned())
            .stdin(StdinMode::Piped)
            .stdout(OutputMode::File(log.to_path_buf()))
            .merge_stderr(true))
    }
}

/// Build clients of running builds, keyed by build id. Receives runner exits.
#[derive(Default)]
struct ClientRegistry {
    clients: Mutex<HashMap<BuildId, Arc<dyn BuildClient>>>,
}

#[async_trait]
impl ProcessEventSink for ClientRegistry {
    async fn process_finished(&self, id: &str, status: ExitStatus) -> Result<()> {
        let build_id: BuildId = id
            .parse()
            .map_err(|_| Error::Internal(format!("unexpected process id {id}")))?;

        // Gone when the build was cancelled; the canceller already reported.
        let Some(client) = self.clients.lock().await.remove(&build_id) else {
            debug!(build_id = %build_id, "Ignoring exit of unregistered build");
            return Ok(());
        };

        let result = if status.success() {
            BuildStatus::Success
        } else {
            BuildStatus::Error
        };
        match client.set_status(build_id, result).await {
            Ok(()) => {
                info!(build_id = %build_id, status = %result, exit = %status, "Build finished");
                Ok(())
            }
            Err(Error::Conflict(reason)) => {
                debug!(build_id = %build_id, reason = %reason, "Build status already final");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub struct HostBuildManager {
    ctx: BuildContext,
    settings: HostSettings,
    registry: Arc<ClientRegistry>,
    supervisor: ProcessSupervisor,
}

impl HostBuildManager {
    pub fn new(ctx: BuildContext, settings: HostSettings) -> Self {
        let registry = Arc::new(ClientRegistry::default());
        let supervisor = ProcessSupervisor::new(registry.clone(), settings.poll_interval);
        Self {
            ctx,
            settings,
            registry,
            supervisor,
        }
    }

    async fn unregister(&self, build_id: BuildId) -> Option<Arc<dyn BuildClient>> {
        self.registry.clients.lock().await.remove(&build_id)
    }
}

#[async_trait]
impl BuildManager for HostBuildManager {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn init(&self) -> Result<()> {
        self.supervisor.start().await?;
        Ok(())
    }

    async fn shutdown(&self, cancel_running: bool) -> Result<()> {
        if cancel_running {
            let clients: Vec<_> = self.registry.clients.lock().await.drain().collect();
            for (build_id, client) in clients {
                if let Err(e) = client.set_status(build_id, BuildStatus::Stopped).await {
                    warn!(build_id = %build_id, error = %e, "Failed to stop build");
                }
            }
        }
        self.supervisor.stop(true, cancel_running).await?;
        info!(manager = self.name(), "Build manager shut down");
        Ok(())
    }

    async fn start_build(&self, data: BuildData, client: Arc<dyn BuildClient>) -> Result<()> {
        let build_id = data.build_id;
        let (build, repository) = self.ctx.load(build_id).await?;
        let paths = self.ctx.paths(&repository, &build);
        let config = self.settings.process_config(&paths.workspace, &paths.log)?;
        let line = data
            .to_json_line()
            .map_err(|e| Error::Internal(format!("failed to encode build data: {e}")))?;

        {
            let mut clients = self.registry.clients.lock().await;
            if clients.contains_key(&build_id) {
                return Err(Error::Conflict(format!("build {build_id} is already running")));
            }
            clients.insert(build_id, client);
        }

        // Start a fresh log; the runner appends to it.
        let log = BuildLog::create(&paths.log)?;
        log.info(format!("Starting runner for build {}", build_id));

        let stdin = match self
            .supervisor
            .start_process(build_id.to_string(), &config)
            .await
        {
            Ok(stdin) => stdin,
            Err(e) => {
                self.unregister(build_id).await;
                log.error(format!("Failed to start runner: {}", e));
                return Err(e.into());
            }
        };

        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                // The runner cannot proceed without its data and will exit.
                warn!(build_id = %build_id, error = %e, "Failed to hand build data to runner");
                log.error(format!("Failed to hand build data to runner: {}", e));
            }
        }

        info!(build_id = %build_id, workspace = %paths.workspace.display(), "Runner started");
        Ok(())
    }

    async fn cancel_build(&self, build_id: BuildId, client: Arc<dyn BuildClient>) -> Result<()> {
        if self.unregister(build_id).await.is_none() {
            return Err(Error::BuildNotRunning(build_id));
        }

        match client.set_status(build_id, BuildStatus::Stopped).await {
            Ok(()) => {}
            Err(Error::Conflict(reason)) => {
                debug!(build_id = %build_id, reason = %reason, "Build status already final");
            }
            Err(e) => return Err(e),
        }

        match self.supervisor.terminate(&build_id.to_string()).await {
            Ok(()) | Err(SupervisorError::UnknownProcess(_)) => {}
            Err(e) => warn!(build_id = %build_id, error = %e, "Failed to terminate runner"),
        }
        info!(build_id = %build_id, "Build cancelled");
        Ok(())
    }

    async fn is_running(&self, build_id: BuildId) -> bool {
        self.registry.clients.lock().await.contains_key(&build_id)
    }

    async fn active_builds(&self) -> usize {
        self.supervisor.process_count().await
    }
}
