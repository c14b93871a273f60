//! System configuration parsing.
//!
//! ```kdl
//! build-dir "/var/lib/hookci/builds"
//! override-dir "/var/lib/hookci/overrides"
//! parallel-builds 2
//! build-scripts ".hookci.sh" ".hookci.cmd"
//! git-folder-handling "delete-before-build"
//! dispatch "host"
//! token-secret "${env.HOOKCI_TOKEN_SECRET}"
//!
//! repository "acme/widget" {
//!     clone-url "git@github.com:acme/widget.git"
//!     secret "${env.WIDGET_SECRET}"
//!     ref "refs/heads/main"
//! }
//! ```

use crate::{ConfigError, ConfigResult, VariableContext};
use hookci_core::repository::NewRepository;
use hookci_core::{GitFolderHandling, secret};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Smallest poll interval the process supervisor accepts.
pub const MIN_PROCESS_POLL: Duration = Duration::from_millis(100);

/// How queued builds reach execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// In-process queue drained by a fixed pool of workers.
    #[default]
    Queue,
    /// Scheduler + build manager running the pipeline as in-process tasks.
    Local,
    /// Scheduler + build manager spawning a runner process per build.
    Host,
}

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "queue" => Ok(DispatchMode::Queue),
            "local" => Ok(DispatchMode::Local),
            "host" => Ok(DispatchMode::Host),
            other => Err(ConfigError::invalid(
                "dispatch",
                format!("expected queue, local or host, got {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshConfig {
    /// Default identity file, overridable per repository.
    pub identity_file: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub clone_url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub ssh_identity_file: Option<PathBuf>,
    pub refs: Vec<String>,
}

impl From<RepositoryConfig> for NewRepository {
    fn from(config: RepositoryConfig) -> Self {
        NewRepository {
            name: config.name,
            clone_url: config.clone_url,
            secret: config.secret,
            ssh_identity_file: config.ssh_identity_file,
            ref_whitelist: config.refs,
        }
    }
}

/// Server-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub build_dir: PathBuf,
    pub override_dir: PathBuf,
    /// Number of queue workers, or concurrent builds in scheduler modes.
    pub parallel_builds: usize,
    /// Candidate build script names, tried in order.
    pub build_scripts: Vec<String>,
    pub git_folder_handling: GitFolderHandling,
    pub ssh: SshConfig,
    pub dispatch: DispatchMode,
    pub scheduler_poll: Duration,
    pub process_poll: Duration,
    /// Base URL spawned runners use to reach the callback API.
    pub api_url: String,
    /// Argv prefix of the build runner; workspace and scripts are appended.
    pub runner_command: Vec<String>,
    #[serde(skip_serializing)]
    pub token_secret: String,
    pub token_ttl: Duration,
    pub listen: String,
    /// PostgreSQL URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("builds"),
            override_dir: PathBuf::from("overrides"),
            parallel_builds: 1,
            build_scripts: vec![".hookci.sh".to_string(), ".hookci.cmd".to_string()],
            git_folder_handling: GitFolderHandling::default(),
            ssh: SshConfig::default(),
            dispatch: DispatchMode::default(),
            scheduler_poll: Duration::from_secs(1),
            process_poll: Duration::from_secs(1),
            api_url: "http://127.0.0.1:4042/api/internal".to_string(),
            runner_command: vec!["hookci".to_string(), "run-build".to_string()],
            token_secret: secret::generate_secret(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            listen: "0.0.0.0:4042".to_string(),
            database_url: None,
            repositories: Vec::new(),
        }
    }
}

/// Read and parse a configuration file, interpolating the process environment.
pub fn load_system_config(path: &Path) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    parse_system_config_with(kdl, &VariableContext::from_process_env())
}

/// Parse system configuration, resolving variables from `vars`.
pub fn parse_system_config_with(kdl: &str, vars: &VariableContext) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if name != "repository" && !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }

        match name {
            "build-dir" => config.build_dir = PathBuf::from(required_string(node, vars)?),
            "override-dir" => config.override_dir = PathBuf::from(required_string(node, vars)?),
            "parallel-builds" => {
                let value = required_integer(node)?;
                if value < 1 {
                    return Err(ConfigError::invalid(name, "must be at least 1"));
                }
                config.parallel_builds = value as usize;
            }
            "build-scripts" => {
                let scripts = get_all_string_args(node, vars);
                if scripts.is_empty() {
                    return Err(ConfigError::invalid(name, "needs at least one script name"));
                }
                config.build_scripts = scripts;
            }
            "git-folder-handling" => {
                config.git_folder_handling = required_string(node, vars)?
                    .parse()
                    .map_err(|e: hookci_core::Error| ConfigError::invalid(name, e.to_string()))?;
            }
            "ssh-identity-file" => {
                config.ssh.identity_file = Some(PathBuf::from(required_string(node, vars)?));
            }
            "ssh-verbose" => config.ssh.verbose = required_bool(node, vars)?,
            "dispatch" => config.dispatch = required_string(node, vars)?.parse()?,
            "scheduler-poll-ms" => config.scheduler_poll = required_millis(node)?,
            "process-poll-ms" => {
                let poll = required_millis(node)?;
                if poll < MIN_PROCESS_POLL {
                    return Err(ConfigError::invalid(
                        name,
                        format!("must be at least {}", MIN_PROCESS_POLL.as_millis()),
                    ));
                }
                config.process_poll = poll;
            }
            "api-url" => config.api_url = required_string(node, vars)?,
            "runner-command" => {
                let command = get_all_string_args(node, vars);
                if command.is_empty() {
                    return Err(ConfigError::invalid(name, "needs a program"));
                }
                config.runner_command = command;
            }
            "token-secret" => {
                let secret = required_string(node, vars)?;
                if secret.is_empty() {
                    return Err(ConfigError::invalid(name, "must not be empty"));
                }
                config.token_secret = secret;
            }
            "token-ttl-secs" => {
                let secs = required_integer(node)?;
                if secs < 1 {
                    return Err(ConfigError::invalid(name, "must be positive"));
                }
                config.token_ttl = Duration::from_secs(secs as u64);
            }
            "listen" => config.listen = required_string(node, vars)?,
            "database-url" => config.database_url = Some(required_string(node, vars)?),
            "repository" => {
                let repo = parse_repository(node, vars)?;
                if config.repositories.iter().any(|r| r.name == repo.name) {
                    return Err(ConfigError::Duplicate(format!("repository {}", repo.name)));
                }
                config.repositories.push(repo);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_repository(node: &KdlNode, vars: &VariableContext) -> ConfigResult<RepositoryConfig> {
    let name = get_first_string_arg(node, vars)
        .ok_or_else(|| ConfigError::MissingField("repository name".to_string()))?;

    let mut clone_url = None;
    let mut secret = None;
    let mut ssh_identity_file = None;
    let mut refs = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "clone-url" => clone_url = Some(required_string(child, vars)?),
                "secret" => secret = Some(required_string(child, vars)?),
                "ssh-identity-file" => {
                    ssh_identity_file = Some(PathBuf::from(required_string(child, vars)?));
                }
                "ref" => refs.extend(get_all_string_args(child, vars)),
                _ => {}
            }
        }
    }

    let clone_url = clone_url
        .ok_or_else(|| ConfigError::MissingField(format!("clone-url for repository {name}")))?;
    let secret =
        secret.ok_or_else(|| ConfigError::MissingField(format!("secret for repository {name}")))?;
    if secret.is_empty() {
        return Err(ConfigError::invalid(
            &format!("secret for repository {name}"),
            "must not be empty",
        ));
    }

    Ok(RepositoryConfig {
        name,
        clone_url,
        secret,
        ssh_identity_file,
        refs,
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode, vars: &VariableContext) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| vars.interpolate(s))
}

fn get_all_string_args(node: &KdlNode, vars: &VariableContext) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| vars.interpolate(s))
        .collect()
}

fn required_string(node: &KdlNode, vars: &VariableContext) -> ConfigResult<String> {
    get_first_string_arg(node, vars)
        .ok_or_else(|| ConfigError::MissingField(node.name().value().to_string()))
}

fn required_integer(node: &KdlNode) -> ConfigResult<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::invalid(node.name().value(), "expected an integer"))
}

fn required_millis(node: &KdlNode) -> ConfigResult<Duration> {
    let millis = required_integer(node)?;
    if millis < 1 {
        return Err(ConfigError::invalid(node.name().value(), "must be positive"));
    }
    Ok(Duration::from_millis(millis as u64))
}

// Accepts both KDL booleans and the strings "true"/"false".
fn required_bool(node: &KdlNode, vars: &VariableContext) -> ConfigResult<bool> {
    let field = node.name().value();
    let entry = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    if let Some(value) = entry.value().as_bool() {
        return Ok(value);
    }
    match entry.value().as_string().map(|s| vars.interpolate(s)).as_deref() {
        Some("true") | Some("yes") => Ok(true),
        Some("false") | Some("no") => Ok(false),
        _ => Err(ConfigError::invalid(field, "expected a boolean")),
    }
}
