//! Build client used by a runner process to report back over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use hookci_core::{BuildClient, BuildData, BuildId, BuildStatus, Error, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::{ErrorBody, RevisionBody, SectionBody, StatusBody};

/// Talks to `<base_url>/build/{id}/...` with a per-build bearer token.
pub struct RemoteBuildClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RemoteBuildClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn from_build_data(data: &BuildData) -> Self {
        Self::new(data.build_api_url.clone(), data.build_token.clone())
    }

    fn url(&self, build_id: BuildId, path: &str) -> String {
        format!("{}/build/{}/{}", self.base_url, build_id, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("callback request failed: {e}")))?;
        check(response).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    debug!(status = %status, url = %response.url(), "Callback request rejected");

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());

    Err(match status {
        StatusCode::BAD_REQUEST => Error::InvalidInput(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        _ => Error::Internal(message),
    })
}

fn decode_error(e: reqwest::Error) -> Error {
    Error::Internal(format!("invalid callback response: {e}"))
}

// Each path segment is encoded on its own so `/` keeps separating directories.
fn encode_path(filename: &str) -> String {
    filename
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl BuildClient for RemoteBuildClient {
    async fn get_status(&self, build_id: BuildId) -> Result<BuildStatus> {
        let response = self
            .send(self.http.get(self.url(build_id, "status")))
            .await?;
        let body: StatusBody = response.json().await.map_err(decode_error)?;
        Ok(body.status)
    }

    async fn set_status(&self, build_id: BuildId, status: BuildStatus) -> Result<()> {
        self.send(
            self.http
                .post(self.url(build_id, "status"))
                .json(&StatusBody { status }),
        )
        .await?;
        Ok(())
    }

    async fn set_revision_info(
        &self,
        build_id: BuildId,
        git_ref: &str,
        commit_sha: &str,
    ) -> Result<()> {
        let body = RevisionBody {
            git_ref: git_ref.to_string(),
            commit_sha: commit_sha.to_string(),
        };
        self.send(self.http.post(self.url(build_id, "revision-info")).json(&body))
            .await?;
        Ok(())
    }

    async fn start_section(&self, build_id: BuildId, description: &str) -> Result<()> {
        let body = SectionBody {
            description: description.to_string(),
        };
        self.send(self.http.put(self.url(build_id, "section")).json(&body))
            .await?;
        Ok(())
    }

    async fn append_output(&self, build_id: BuildId, data: Bytes) -> Result<()> {
        self.send(
            self.http
                .post(self.url(build_id, "output/append"))
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
        )
        .await?;
        Ok(())
    }

    async fn list_overrides(&self, build_id: BuildId) -> Result<Vec<String>> {
        let response = self
            .send(self.http.get(self.url(build_id, "overrides")))
            .await?;
        response.json().await.map_err(decode_error)
    }

    async fn get_override(&self, build_id: BuildId, filename: &str) -> Result<Bytes> {
        let path = format!("overrides/{}", encode_path(filename));
        let response = self.send(self.http.get(self.url(build_id, &path))).await?;
        response.bytes().await.map_err(decode_error)
    }
}
