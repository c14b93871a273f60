//! Shared state every dispatch component needs.

use hookci_config::SystemConfig;
use hookci_core::{Build, BuildData, BuildId, BuildPaths, BuildToken, Repository};
use hookci_db::{BuildRepo, DbResult, RepositoryRepo, Store};
use hookci_executor::PipelineSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The store plus the settings needed to locate and describe a build.
#[derive(Clone)]
pub struct BuildContext {
    pub store: Arc<dyn Store>,
    pub build_dir: PathBuf,
    pub override_dir: PathBuf,
    /// Used when the repository has no identity file of its own.
    pub default_identity_file: Option<PathBuf>,
    /// Callback API base URL handed to runners.
    pub api_url: String,
    pub token_secret: String,
    pub token_ttl: Duration,
}

impl BuildContext {
    pub fn from_config(store: Arc<dyn Store>, config: &SystemConfig) -> Self {
        Self {
            store,
            build_dir: config.build_dir.clone(),
            override_dir: config.override_dir.clone(),
            default_identity_file: config.ssh.identity_file.clone(),
            api_url: config.api_url.clone(),
            token_secret: config.token_secret.clone(),
            token_ttl: config.token_ttl,
        }
    }

    /// Fetch a build together with its repository.
    pub async fn load(&self, build_id: BuildId) -> DbResult<(Build, Repository)> {
        let build = self.store.get_build(build_id).await?;
        let repository = self.store.get_repository(build.repository_id).await?;
        Ok((build, repository))
    }

    pub fn paths(&self, repository: &Repository, build: &Build) -> BuildPaths {
        BuildPaths::new(
            &self.build_dir,
            &self.override_dir,
            &repository.name,
            build.num,
        )
    }

    /// Snapshot for a runner, including a freshly issued callback token.
    pub fn build_data(&self, build: &Build, repository: &Repository) -> BuildData {
        let token = BuildToken::issue(&self.token_secret, build.id, self.token_ttl);
        BuildData {
            identity_file: repository
                .ssh_identity_file
                .clone()
                .or_else(|| self.default_identity_file.clone()),
            repository_id: repository.id,
            repository_name: repository.name.clone(),
            repository_clone_url: repository.clone_url.clone(),
            build_id: build.id,
            build_ref: build.git_ref.clone(),
            build_commit_sha: build.commit_sha.clone(),
            build_api_url: self.api_url.clone(),
            build_token: token.into_string(),
        }
    }
}

pub fn pipeline_settings(config: &SystemConfig) -> PipelineSettings {
    PipelineSettings {
        build_scripts: config.build_scripts.clone(),
        git_folder_handling: config.git_folder_handling,
        ssh_verbose: config.ssh.verbose,
    }
}
