//! Build records and the build state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{BuildId, Error, RepositoryId};

/// Commit SHA meaning "resolve the ref at checkout time".
pub const NULL_COMMIT_SHA: &str = "0000000000000000000000000000000000000000";

/// Lifecycle state of a build.
///
/// `Queued -> Building -> {Success, Error, Stopped}`, plus `Queued -> Stopped`
/// for builds cancelled before they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Building,
    Success,
    Error,
    Stopped,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Building => "building",
            BuildStatus::Success => "success",
            BuildStatus::Error => "error",
            BuildStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Error | BuildStatus::Stopped
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match (self, next) {
            (BuildStatus::Queued, BuildStatus::Building) => true,
            (BuildStatus::Queued, BuildStatus::Stopped) => true,
            (BuildStatus::Building, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BuildStatus::Queued),
            "building" => Ok(BuildStatus::Building),
            "success" => Ok(BuildStatus::Success),
            "error" => Ok(BuildStatus::Error),
            "stopped" => Ok(BuildStatus::Stopped),
            other => Err(Error::InvalidInput(format!("unknown build status: {other}"))),
        }
    }
}

/// A single execution attempt of a repository's build script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub repository_id: RepositoryId,
    /// Sequence number, unique within the repository.
    pub num: i64,
    pub git_ref: String,
    pub commit_sha: String,
    pub status: BuildStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Returns true for a 40 character hexadecimal commit SHA.
pub fn is_valid_commit_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit())
}

/// What to do with the `.git` directory of a workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitFolderHandling {
    #[default]
    DeleteBeforeBuild,
    DeleteAfterBuild,
    DisableDelete,
}

impl GitFolderHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitFolderHandling::DeleteBeforeBuild => "delete-before-build",
            GitFolderHandling::DeleteAfterBuild => "delete-after-build",
            GitFolderHandling::DisableDelete => "disable-delete",
        }
    }
}

impl fmt::Display for GitFolderHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitFolderHandling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete-before-build" => Ok(GitFolderHandling::DeleteBeforeBuild),
            "delete-after-build" => Ok(GitFolderHandling::DeleteAfterBuild),
            "disable-delete" => Ok(GitFolderHandling::DisableDelete),
            other => Err(Error::InvalidInput(format!(
                "unknown git folder handling: {other}"
            ))),
        }
    }
}

/// On-disk locations belonging to one build.
///
/// ```text
/// <build_dir>/<repo-name>/<num>       workspace
/// <build_dir>/<repo-name>/<num>.zip   artifact
/// <build_dir>/<repo-name>/<num>.log   log
/// <override_dir>/<repo-name>          overrides
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub workspace: PathBuf,
    pub artifact: PathBuf,
    pub log: PathBuf,
    pub overrides: PathBuf,
}

impl BuildPaths {
    pub fn new(build_dir: &Path, override_dir: &Path, repository_name: &str, num: i64) -> Self {
        let workspace = join_name(build_dir, repository_name).join(num.to_string());
        Self {
            artifact: artifact_path(&workspace),
            log: log_path(&workspace),
            overrides: join_name(override_dir, repository_name),
            workspace,
        }
    }
}

/// Artifact path for a workspace directory: a `.zip` sibling.
pub fn artifact_path(workspace: &Path) -> PathBuf {
    with_suffix(workspace, "zip")
}

/// Log path for a workspace directory: a `.log` sibling.
pub fn log_path(workspace: &Path) -> PathBuf {
    with_suffix(workspace, "log")
}

fn with_suffix(workspace: &Path, suffix: &str) -> PathBuf {
    let mut name = workspace.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

// Repository names look like "owner/name"; each segment becomes a directory.
fn join_name(base: &Path, repository_name: &str) -> PathBuf {
    repository_name
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .fold(base.to_path_buf(), |path, part| path.join(part))
}
