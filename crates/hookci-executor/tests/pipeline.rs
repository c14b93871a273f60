//! End-to-end pipeline runs against a local git repository.

use async_trait::async_trait;
use bytes::Bytes;
use hookci_core::{
    BuildClient, BuildData, BuildId, BuildStatus, Error, GitFolderHandling, NULL_COMMIT_SHA,
    RepositoryId, Result,
};
use hookci_executor::{BuildLog, BuildOutcome, BuildPipeline, PipelineSettings};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingClient {
    overrides: BTreeMap<String, Bytes>,
    sections: Mutex<Vec<String>>,
    revision: Mutex<Option<(String, String)>>,
}

#[async_trait]
impl BuildClient for RecordingClient {
    async fn get_status(&self, _build_id: BuildId) -> Result<BuildStatus> {
        Ok(BuildStatus::Building)
    }

    async fn set_status(&self, _build_id: BuildId, _status: BuildStatus) -> Result<()> {
        Ok(())
    }

    async fn set_revision_info(
        &self,
        _build_id: BuildId,
        git_ref: &str,
        commit_sha: &str,
    ) -> Result<()> {
        *self.revision.lock().unwrap() = Some((git_ref.to_string(), commit_sha.to_string()));
        Ok(())
    }

    async fn start_section(&self, _build_id: BuildId, description: &str) -> Result<()> {
        self.sections.lock().unwrap().push(description.to_string());
        Ok(())
    }

    async fn append_output(&self, _build_id: BuildId, _data: Bytes) -> Result<()> {
        Ok(())
    }

    async fn list_overrides(&self, _build_id: BuildId) -> Result<Vec<String>> {
        Ok(self.overrides.keys().cloned().collect())
    }

    async fn get_override(&self, _build_id: BuildId, filename: &str) -> Result<Bytes> {
        self.overrides
            .get(filename)
            .cloned()
            .ok_or_else(|| Error::NotFound(filename.to_string()))
    }
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=hookci",
            "-c",
            "user.email=hookci@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

struct Fixture {
    dir: TempDir,
    origin: PathBuf,
    head: String,
}

impl Fixture {
    /// A repository on branch `main` with a single commit holding `.hookci.sh`.
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "-q"]);
        git(&origin, &["checkout", "-q", "-b", "main"]);
        std::fs::write(origin.join(".hookci.sh"), script).unwrap();
        std::fs::write(origin.join("README"), "widget\n").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "-q", "-m", "initial"]);
        let head = git(&origin, &["rev-parse", "HEAD"]);
        Self { dir, origin, head }
    }

    fn workspace(&self) -> PathBuf {
        self.dir.path().join("builds/acme/widget/1")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("builds/acme/widget/1.log")
    }

    fn artifact_path(&self) -> PathBuf {
        self.dir.path().join("builds/acme/widget/1.zip")
    }

    fn data(&self, git_ref: &str, commit_sha: &str) -> BuildData {
        BuildData {
            identity_file: None,
            repository_id: RepositoryId::new(1),
            repository_name: "acme/widget".to_string(),
            repository_clone_url: self.origin.to_string_lossy().into_owned(),
            build_id: BuildId::new(1),
            build_ref: git_ref.to_string(),
            build_commit_sha: commit_sha.to_string(),
            build_api_url: "http://127.0.0.1:4042/api/internal".to_string(),
            build_token: String::new(),
        }
    }

    async fn run(
        &self,
        data: &BuildData,
        client: &RecordingClient,
        cancel: &CancellationToken,
    ) -> BuildOutcome {
        let pipeline = BuildPipeline::new(PipelineSettings::default());
        let log = BuildLog::create(&self.log_path()).unwrap();
        pipeline
            .run(data, &self.workspace(), &log, client, cancel)
            .await
    }

    fn log(&self) -> String {
        std::fs::read_to_string(self.log_path()).unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_successful_build_is_archived() {
    let fixture = Fixture::new("#!/bin/sh\necho SCRIPT_RAN\nexit 0\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &fixture.head);

    let outcome = fixture.run(&data, &client, &CancellationToken::new()).await;

    assert_eq!(outcome, BuildOutcome::Success);
    assert!(fixture.artifact_path().exists());
    assert!(!fixture.workspace().exists());
    let log = fixture.log();
    assert!(!log.is_empty());
    assert!(log.contains("SCRIPT_RAN"));
    assert_eq!(
        *client.sections.lock().unwrap(),
        vec!["Clone repository", "Run build script", "Archive workspace"]
    );
    assert!(client.revision.lock().unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_script_still_archives() {
    let fixture = Fixture::new("#!/bin/sh\necho broken\nexit 1\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &fixture.head);

    let outcome = fixture.run(&data, &client, &CancellationToken::new()).await;

    assert_eq!(outcome, BuildOutcome::Failed);
    assert_eq!(outcome.status(), BuildStatus::Error);
    assert!(fixture.artifact_path().exists());
    assert!(!fixture.workspace().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_commit_fails_at_checkout() {
    let fixture = Fixture::new("#!/bin/sh\necho SCRIPT_RAN\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &"deadbeef".repeat(5));

    let outcome = fixture.run(&data, &client, &CancellationToken::new()).await;

    assert_eq!(outcome, BuildOutcome::Failed);
    let log = fixture.log();
    assert!(log.contains("Checkout failed"));
    assert!(!log.contains("SCRIPT_RAN"));
    assert!(
        !client
            .sections
            .lock()
            .unwrap()
            .contains(&"Run build script".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ref_only_build_resolves_revision() {
    let fixture = Fixture::new("#!/bin/sh\nexit 0\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", NULL_COMMIT_SHA);

    let outcome = fixture.run(&data, &client, &CancellationToken::new()).await;

    assert_eq!(outcome, BuildOutcome::Success);
    assert_eq!(
        *client.revision.lock().unwrap(),
        Some(("refs/heads/main".to_string(), fixture.head.clone()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overrides_applied_after_git_folder_removed() {
    let fixture = Fixture::new("#!/bin/sh\ntest ! -d .git || exit 2\ncat config/app.env\n");
    let mut client = RecordingClient::default();
    client.overrides.insert(
        "config/app.env".to_string(),
        Bytes::from_static(b"TOKEN=from-override\n"),
    );
    client
        .overrides
        .insert("README".to_string(), Bytes::from_static(b"replaced\n"));
    let data = fixture.data("refs/heads/main", &fixture.head);

    let outcome = fixture.run(&data, &client, &CancellationToken::new()).await;

    assert_eq!(outcome, BuildOutcome::Success);
    let log = fixture.log();
    assert!(log.contains("TOKEN=from-override"));
    assert!(log.contains("Applied override README"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_git_folder_kept_when_disabled() {
    let fixture = Fixture::new("#!/bin/sh\ntest -d .git\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &fixture.head);
    let pipeline = BuildPipeline::new(PipelineSettings {
        git_folder_handling: GitFolderHandling::DisableDelete,
        ..PipelineSettings::default()
    });
    let log = BuildLog::create(&fixture.log_path()).unwrap();

    let outcome = pipeline
        .run(&data, &fixture.workspace(), &log, &client, &CancellationToken::new())
        .await;

    assert_eq!(outcome, BuildOutcome::Success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_build_script() {
    let fixture = Fixture::new("#!/bin/sh\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &fixture.head);
    let pipeline = BuildPipeline::new(PipelineSettings {
        build_scripts: vec!["build.sh".to_string()],
        ..PipelineSettings::default()
    });
    let log = BuildLog::create(&fixture.log_path()).unwrap();

    let outcome = pipeline
        .run(&data, &fixture.workspace(), &log, &client, &CancellationToken::new())
        .await;

    assert_eq!(outcome, BuildOutcome::Failed);
    assert!(fixture.log().contains("no build script found"));
    assert!(fixture.artifact_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_stops_running_script() {
    let fixture = Fixture::new("#!/bin/sh\nsleep 30\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &fixture.head);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let log_path = fixture.log_path();
    tokio::spawn(async move {
        // Wait until the script is running.
        for _ in 0..200 {
            let started = std::fs::read_to_string(&log_path)
                .map(|log| log.contains(".hookci.sh"))
                .unwrap_or(false);
            if started {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(20),
        fixture.run(&data, &client, &cancel),
    )
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Stopped);
    assert!(fixture.artifact_path().exists());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let fixture = Fixture::new("#!/bin/sh\necho SCRIPT_RAN\n");
    let client = RecordingClient::default();
    let data = fixture.data("refs/heads/main", &fixture.head);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = fixture.run(&data, &client, &cancel).await;

    assert_eq!(outcome, BuildOutcome::Stopped);
    assert!(!fixture.workspace().exists());
    assert!(!fixture.artifact_path().exists());
}
