//! Build client backed directly by the store and the build directory.

use async_trait::async_trait;
use bytes::Bytes;
use hookci_core::{BuildClient, BuildId, BuildPaths, BuildStatus, Error, Result};
use hookci_db::BuildRepo;
use hookci_executor::BuildLog;
use hookci_executor::workspace::{list_files, safe_relative_path};
use std::io;
use tracing::info;

use crate::BuildContext;

pub struct LocalBuildClient {
    ctx: BuildContext,
}

impl LocalBuildClient {
    pub fn new(ctx: BuildContext) -> Self {
        Self { ctx }
    }

    async fn paths(&self, build_id: BuildId) -> Result<BuildPaths> {
        let (build, repository) = self.ctx.load(build_id).await?;
        Ok(self.ctx.paths(&repository, &build))
    }
}

#[async_trait]
impl BuildClient for LocalBuildClient {
    async fn get_status(&self, build_id: BuildId) -> Result<BuildStatus> {
        Ok(self.ctx.store.get_build(build_id).await?.status)
    }

    async fn set_status(&self, build_id: BuildId, status: BuildStatus) -> Result<()> {
        self.ctx.store.transition(build_id, status).await?;
        info!(build_id = %build_id, status = %status, "Build status changed");
        Ok(())
    }

    async fn set_revision_info(
        &self,
        build_id: BuildId,
        git_ref: &str,
        commit_sha: &str,
    ) -> Result<()> {
        self.ctx
            .store
            .set_revision(build_id, git_ref, commit_sha)
            .await?;
        info!(build_id = %build_id, git_ref = %git_ref, commit = %commit_sha, "Build revision resolved");
        Ok(())
    }

    async fn start_section(&self, build_id: BuildId, description: &str) -> Result<()> {
        let paths = self.paths(build_id).await?;
        BuildLog::append(&paths.log)?.info(format!("==> {}", description));
        Ok(())
    }

    async fn append_output(&self, build_id: BuildId, data: Bytes) -> Result<()> {
        let paths = self.paths(build_id).await?;
        BuildLog::append(&paths.log)?.write_raw(&data);
        Ok(())
    }

    async fn list_overrides(&self, build_id: BuildId) -> Result<Vec<String>> {
        let paths = self.paths(build_id).await?;
        Ok(list_files(&paths.overrides).await?)
    }

    async fn get_override(&self, build_id: BuildId, filename: &str) -> Result<Bytes> {
        let relative = safe_relative_path(filename)
            .ok_or_else(|| Error::InvalidInput(format!("invalid override path: {filename}")))?;
        let paths = self.paths(build_id).await?;

        match tokio::fs::read(paths.overrides.join(relative)).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("override {filename}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{context, repository};
    use hookci_core::NULL_COMMIT_SHA;

    #[tokio::test]
    async fn test_status_follows_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let repo = repository(&ctx, "acme/widget", "/src/widget").await;
        let build = ctx
            .store
            .create_build(repo.id, "refs/heads/main", NULL_COMMIT_SHA)
            .await
            .unwrap();
        let client = LocalBuildClient::new(ctx.clone());

        client.set_status(build.id, BuildStatus::Building).await.unwrap();
        client.set_status(build.id, BuildStatus::Stopped).await.unwrap();
        assert!(matches!(
            client.set_status(build.id, BuildStatus::Success).await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(client.get_status(build.id).await.unwrap(), BuildStatus::Stopped);
    }

    #[tokio::test]
    async fn test_sections_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let repo = repository(&ctx, "acme/widget", "/src/widget").await;
        let build = ctx
            .store
            .create_build(repo.id, "refs/heads/main", NULL_COMMIT_SHA)
            .await
            .unwrap();
        let overrides = dir.path().join("overrides/acme/widget");
        std::fs::create_dir_all(overrides.join("conf")).unwrap();
        std::fs::write(overrides.join("conf/app.env"), "A=1").unwrap();
        let client = LocalBuildClient::new(ctx.clone());

        client.start_section(build.id, "Clone repository").await.unwrap();
        client
            .append_output(build.id, Bytes::from_static(b"raw output\n"))
            .await
            .unwrap();
        let log = std::fs::read_to_string(dir.path().join("builds/acme/widget/1.log")).unwrap();
        assert!(log.contains("==> Clone repository"));
        assert!(log.ends_with("raw output\n"));

        assert_eq!(client.list_overrides(build.id).await.unwrap(), vec!["conf/app.env"]);
        assert_eq!(
            client.get_override(build.id, "conf/app.env").await.unwrap(),
            Bytes::from_static(b"A=1")
        );
        assert!(matches!(
            client.get_override(build.id, "../../secret").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            client.get_override(build.id, "missing").await,
            Err(Error::NotFound(_))
        ));
    }
}
