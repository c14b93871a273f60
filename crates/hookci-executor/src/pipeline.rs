//! The build pipeline: clone, checkout, overrides, build script, archive.

use hookci_core::build::artifact_path;
use hookci_core::{BuildClient, BuildData, BuildId, BuildStatus, GitFolderHandling};
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{CommandOutcome, run_logged};
use crate::workspace::{
    archive_workspace, find_build_script, make_executable, remove_dir_if_exists,
    remove_git_folder, write_override,
};
use crate::{BuildLog, PipelineError, git};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Candidate build script names, tried in order in the workspace root.
    pub build_scripts: Vec<String>,
    pub git_folder_handling: GitFolderHandling,
    pub ssh_verbose: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            build_scripts: vec![".hookci.sh".to_string(), ".hookci.cmd".to_string()],
            git_folder_handling: GitFolderHandling::default(),
            ssh_verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Failed,
    Stopped,
}

impl BuildOutcome {
    pub fn status(&self) -> BuildStatus {
        match self {
            BuildOutcome::Success => BuildStatus::Success,
            BuildOutcome::Failed => BuildStatus::Error,
            BuildOutcome::Stopped => BuildStatus::Stopped,
        }
    }
}

/// Runs one build in a workspace directory.
///
/// The pipeline never reports the final status itself; callers turn the
/// returned [`BuildOutcome`] into a status through their build client.
pub struct BuildPipeline {
    settings: PipelineSettings,
}

impl BuildPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    /// Execute the build and archive whatever workspace is left behind.
    ///
    /// Errors are written to the build log and yield `BuildOutcome::Failed`.
    /// Archiving failures never change the outcome.
    pub async fn run(
        &self,
        data: &BuildData,
        workspace: &Path,
        log: &BuildLog,
        client: &dyn BuildClient,
        cancel: &CancellationToken,
    ) -> BuildOutcome {
        let build_id = data.build_id;
        info!(
            build_id = %build_id,
            repository = %data.repository_name,
            git_ref = %data.build_ref,
            commit = %data.build_commit_sha,
            "Starting build pipeline"
        );

        let outcome = match self.execute(data, workspace, log, client, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(build_id = %build_id, error = %e, "Build pipeline failed");
                log.error(&e);
                BuildOutcome::Failed
            }
        };

        if tokio::fs::try_exists(workspace).await.unwrap_or(false) {
            section(client, build_id, "Archive workspace").await;
            let artifact = artifact_path(workspace);
            match archive_workspace(workspace, &artifact).await {
                Ok(()) => log.info(format!("Archived workspace to {}", artifact.display())),
                Err(e) => {
                    warn!(build_id = %build_id, error = %e, "Failed to archive workspace");
                    log.error(format!("Failed to archive workspace: {}", e));
                }
            }
        }

        info!(build_id = %build_id, outcome = ?outcome, "Build pipeline finished");
        outcome
    }

    async fn execute(
        &self,
        data: &BuildData,
        workspace: &Path,
        log: &BuildLog,
        client: &dyn BuildClient,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, PipelineError> {
        let build_id = data.build_id;
        if cancelled(cancel, log) {
            return Ok(BuildOutcome::Stopped);
        }

        section(client, build_id, "Clone repository").await;
        let ssh = git::ssh_command(data.identity_file.as_deref(), self.settings.ssh_verbose);
        log.info(format!("GIT_SSH_COMMAND={}", ssh));

        remove_dir_if_exists(workspace).await?;
        if let Some(parent) = workspace.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let clone = git::clone(&ssh, &data.repository_clone_url, workspace);
        if let Some(outcome) = step_failed(run_logged(clone, log, cancel).await?, log, "Clone") {
            return Ok(outcome);
        }

        if cancelled(cancel, log) {
            return Ok(BuildOutcome::Stopped);
        }

        let ref_only = data.is_ref_only();
        let revision = if ref_only {
            git::checkout_target(&data.build_ref)
        } else {
            data.build_commit_sha.as_str()
        };
        log.info(format!("Checking out {}", revision));
        let checkout = git::checkout(&ssh, workspace, revision);
        if let Some(outcome) = step_failed(run_logged(checkout, log, cancel).await?, log, "Checkout")
        {
            return Ok(outcome);
        }

        if ref_only {
            let commit_sha = git::head_sha(workspace, log).await?;
            // Empty when the ref was a raw commit.
            let full_ref = git::symbolic_full_name(workspace, revision, log).await?;
            log.info(format!("Resolved {} to {}", data.build_ref, commit_sha));
            client
                .set_revision_info(build_id, &full_ref, &commit_sha)
                .await?;
        }

        if cancelled(cancel, log) {
            return Ok(BuildOutcome::Stopped);
        }

        if self.settings.git_folder_handling == GitFolderHandling::DeleteBeforeBuild
            && remove_git_folder(workspace).await?
        {
            log.info("Removed .git folder before build");
        }

        let overrides = client.list_overrides(build_id).await?;
        if !overrides.is_empty() {
            section(client, build_id, "Apply overrides").await;
            for name in &overrides {
                let content = client.get_override(build_id, name).await?;
                write_override(workspace, name, &content).await?;
                log.info(format!("Applied override {}", name));
            }
        }

        if cancelled(cancel, log) {
            return Ok(BuildOutcome::Stopped);
        }

        section(client, build_id, "Run build script").await;
        let Some(script) = find_build_script(workspace, &self.settings.build_scripts).await else {
            return Err(PipelineError::NoBuildScript(
                self.settings.build_scripts.join(", "),
            ));
        };
        make_executable(&script).await?;
        let script = tokio::fs::canonicalize(&script).await?;

        let mut command = Command::new(&script);
        command.current_dir(workspace);
        let outcome = run_logged(command, log, cancel).await?;

        if self.settings.git_folder_handling == GitFolderHandling::DeleteAfterBuild
            && remove_git_folder(workspace).await?
        {
            log.info("Removed .git folder after build");
        }

        Ok(match outcome {
            CommandOutcome::Cancelled => BuildOutcome::Stopped,
            CommandOutcome::Exited(status) if status.success() => {
                log.info("Build script succeeded");
                BuildOutcome::Success
            }
            CommandOutcome::Exited(status) => {
                log.error(format!("Build script failed: {}", status));
                BuildOutcome::Failed
            }
        })
    }
}

fn cancelled(cancel: &CancellationToken, log: &BuildLog) -> bool {
    if cancel.is_cancelled() {
        log.warn("Build cancelled");
        return true;
    }
    false
}

/// `Some` when the step ended the build.
fn step_failed(outcome: CommandOutcome, log: &BuildLog, step: &str) -> Option<BuildOutcome> {
    match outcome {
        CommandOutcome::Cancelled => Some(BuildOutcome::Stopped),
        CommandOutcome::Exited(status) if status.success() => None,
        CommandOutcome::Exited(status) => {
            log.error(format!("{} failed: {}", step, status));
            Some(BuildOutcome::Failed)
        }
    }
}

async fn section(client: &dyn BuildClient, build_id: BuildId, description: &str) {
    if let Err(e) = client.start_section(build_id, description).await {
        debug!(build_id = %build_id, section = description, error = %e, "Failed to start section");
    }
}
