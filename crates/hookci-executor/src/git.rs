//! Git invocations used by the build pipeline.

use std::path::Path;
use tokio::process::Command;

use crate::command::capture;
use crate::{BuildLog, PipelineError};

/// Value for `GIT_SSH_COMMAND`: `ssh -oBatchMode=yes [-i <identity>] [-v]`.
pub fn ssh_command(identity_file: Option<&Path>, verbose: bool) -> String {
    let mut parts = vec!["ssh".to_string(), "-oBatchMode=yes".to_string()];
    if let Some(identity) = identity_file {
        parts.push("-i".to_string());
        parts.push(shell_quote(&identity.to_string_lossy()));
    }
    if verbose {
        parts.push("-v".to_string());
    }
    parts.join(" ")
}

/// A git command with non-interactive authentication.
pub fn git(ssh_command: &str) -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_SSH_COMMAND", ssh_command)
        .env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

pub fn clone(ssh_command: &str, url: &str, dest: &Path) -> Command {
    let mut cmd = git(ssh_command);
    cmd.arg("clone").arg("--recursive").arg(url).arg(dest);
    cmd
}

pub fn checkout(ssh_command: &str, workspace: &Path, revision: &str) -> Command {
    let mut cmd = git(ssh_command);
    cmd.current_dir(workspace).args(["checkout", "-q", revision]);
    cmd
}

/// Revision to hand to `git checkout` for a symbolic ref.
///
/// Branch refs are checked out by short name so git creates a local branch
/// tracking the remote one; anything else is used as is.
pub fn checkout_target(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

/// Commit SHA of the current checkout.
pub async fn head_sha(workspace: &Path, log: &BuildLog) -> Result<String, PipelineError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(workspace).args(["rev-parse", "HEAD"]);
    capture(cmd, log).await
}

/// Fully-qualified name of `git_ref` (e.g. `refs/heads/main`). Empty when
/// `git_ref` is a raw commit rather than a symbolic ref.
pub async fn symbolic_full_name(
    workspace: &Path,
    git_ref: &str,
    log: &BuildLog,
) -> Result<String, PipelineError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(workspace)
        .args(["rev-parse", "--symbolic-full-name", git_ref]);
    capture(cmd, log).await
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}
