//! Running build commands with their output in the build log.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{BuildLog, PipelineError};

/// How long a cancelled command gets between SIGTERM and SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum CommandOutcome {
    Exited(ExitStatus),
    Cancelled,
}

/// Run `command` with stdout and stderr appended to `log`.
///
/// The command runs in its own process group. When `cancel` fires, the whole
/// group is terminated and `CommandOutcome::Cancelled` is returned.
pub async fn run_logged(
    mut command: Command,
    log: &BuildLog,
    cancel: &CancellationToken,
) -> Result<CommandOutcome, PipelineError> {
    let description = describe(&command);
    log.info(format!("$ {}", description));

    command
        .stdin(std::process::Stdio::null())
        .stdout(log.stdio()?)
        .stderr(log.stdio()?)
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
        program: program_name(&command),
        source,
    })?;
    debug!(pid = ?child.id(), command = %description, "Spawned build command");

    let outcome = tokio::select! {
        status = child.wait() => CommandOutcome::Exited(status?),
        _ = cancel.cancelled() => CommandOutcome::Cancelled,
    };

    if let CommandOutcome::Cancelled = outcome {
        log.warn(format!("Cancelled, terminating: {}", description));
        terminate(&mut child, TERMINATE_GRACE).await;
    }
    Ok(outcome)
}

/// Run `command` and capture its trimmed stdout; stderr is copied to `log`.
pub async fn capture(mut command: Command, log: &BuildLog) -> Result<String, PipelineError> {
    let description = describe(&command);
    let output = command
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|source| PipelineError::Spawn {
            program: program_name(&command),
            source,
        })?;
    log.write_raw(&output.stderr);

    if !output.status.success() {
        return Err(PipelineError::CommandFailed {
            command: description,
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// SIGTERM the child's process group, then SIGKILL after `grace`.
pub async fn terminate(child: &mut Child, grace: Duration) {
    if let Err(e) = signal_terminate(child) {
        warn!(pid = ?child.id(), error = %e, "Failed to send SIGTERM");
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid = ?child.id(), "Process ignored SIGTERM, killing");
        if let Err(e) = signal_kill(child) {
            warn!(pid = ?child.id(), error = %e, "Failed to send SIGKILL");
        }
        let _ = child.wait().await;
    }
}

/// Ask the child's process group to terminate. Returns immediately.
#[cfg(unix)]
pub fn signal_terminate(child: &mut Child) -> io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn signal_kill(child: &mut Child) -> io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    // Already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    match nix::sys::signal::kill(Pid::from_raw(-(pid as i32)), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
pub fn signal_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
fn signal_kill(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

fn program_name(command: &Command) -> String {
    command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned()
}

fn describe(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
