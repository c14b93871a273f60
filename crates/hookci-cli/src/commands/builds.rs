//! Build commands against the operator API.

use anyhow::{Context, Result, bail};
use hookci_core::{Build, NULL_COMMIT_SHA};
use hookci_scheduler::client::ErrorBody;
use reqwest::Response;
use serde_json::json;

pub async fn trigger(
    server: &str,
    repository: &str,
    git_ref: &str,
    commit: Option<String>,
    secret: &str,
) -> Result<()> {
    let body = json!({
        "repository": repository,
        "ref": git_ref,
        "commit": commit.unwrap_or_else(|| NULL_COMMIT_SHA.to_string()),
        "secret": secret,
    });
    let response = reqwest::Client::new()
        .post(format!("{server}/api/v1/builds"))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {server}"))?;
    let build: Build = check(response).await?.json().await?;
    println!("Queued {} build #{} (id {})", repository, build.num, build.id);
    Ok(())
}

pub async fn show(server: &str, id: i64) -> Result<()> {
    let response = reqwest::Client::new()
        .get(format!("{server}/api/v1/builds/{id}"))
        .send()
        .await
        .with_context(|| format!("Failed to reach {server}"))?;
    print_build(&check(response).await?.json().await?);
    Ok(())
}

pub async fn cancel(server: &str, id: i64) -> Result<()> {
    let build = post(server, id, "cancel").await?;
    println!("Build {} is {}", build.id, build.status);
    Ok(())
}

pub async fn restart(server: &str, id: i64) -> Result<()> {
    let build = post(server, id, "restart").await?;
    println!("Build {} requeued as #{}", build.id, build.num);
    Ok(())
}

pub async fn delete(server: &str, id: i64) -> Result<()> {
    let response = reqwest::Client::new()
        .delete(format!("{server}/api/v1/builds/{id}"))
        .send()
        .await
        .with_context(|| format!("Failed to reach {server}"))?;
    check(response).await?;
    println!("Build {id} deleted");
    Ok(())
}

async fn post(server: &str, id: i64, action: &str) -> Result<Build> {
    let response = reqwest::Client::new()
        .post(format!("{server}/api/v1/builds/{id}/{action}"))
        .send()
        .await
        .with_context(|| format!("Failed to reach {server}"))?;
    Ok(check(response).await?.json().await?)
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_default();
    bail!("{}: {}", status, message)
}

fn print_build(build: &Build) {
    println!("Build {} (#{})", build.id, build.num);
    println!("  status:   {}", build.status);
    println!("  ref:      {}", build.git_ref);
    println!("  commit:   {}", build.commit_sha);
    println!("  queued:   {}", build.queued_at);
    if let Some(started) = build.started_at {
        println!("  started:  {}", started);
    }
    if let Some(finished) = build.finished_at {
        println!("  finished: {}", finished);
    }
}
