//! The build runner started by the host build manager.
//!
//! Reads one [`BuildData`] JSON line from stdin, runs the pipeline and
//! reports through the callback API. Everything printed to stdout ends up in
//! the build log. Exits 0 only when the build succeeded.

use anyhow::{Context, Result, bail};
use hookci_core::{BuildClient, BuildData, BuildStatus, Error, GitFolderHandling};
use hookci_executor::{BuildLog, BuildOutcome, BuildPipeline, PipelineSettings};
use hookci_scheduler::RemoteBuildClient;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RunBuildArgs {
    pub git_folder_handling: GitFolderHandling,
    pub ssh_verbose: bool,
    pub workspace: PathBuf,
    pub scripts: Vec<String>,
}

pub async fn run(args: RunBuildArgs) -> Result<ExitCode> {
    let data = read_build_data().await?;
    let build_id = data.build_id;
    let client = RemoteBuildClient::from_build_data(&data);
    let log = BuildLog::stdout();

    let status = client
        .get_status(build_id)
        .await
        .context("Failed to fetch build status")?;
    if status != BuildStatus::Building {
        log.error(format!("Build {} is {}, not building", build_id, status));
        return Ok(ExitCode::FAILURE);
    }

    let cancel = CancellationToken::new();
    watch_terminate(cancel.clone());

    let pipeline = BuildPipeline::new(PipelineSettings {
        build_scripts: args.scripts,
        git_folder_handling: args.git_folder_handling,
        ssh_verbose: args.ssh_verbose,
    });
    let outcome = pipeline
        .run(&data, &args.workspace, &log, &client, &cancel)
        .await;

    match client.set_status(build_id, outcome.status()).await {
        Ok(()) => info!(build_id = %build_id, status = %outcome.status(), "Reported build status"),
        Err(Error::Conflict(reason)) => {
            info!(build_id = %build_id, reason = %reason, "Build status already final")
        }
        Err(e) => warn!(build_id = %build_id, error = %e, "Failed to report build status"),
    }

    Ok(match outcome {
        BuildOutcome::Success => ExitCode::SUCCESS,
        BuildOutcome::Failed | BuildOutcome::Stopped => ExitCode::FAILURE,
    })
}

async fn read_build_data() -> Result<BuildData> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read build data from stdin")?;
    if line.trim().is_empty() {
        bail!("No build data on stdin");
    }
    BuildData::from_json_line(&line).context("Invalid build data")
}

/// Raise `cancel` when the host asks the runner to terminate.
fn watch_terminate(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
}
