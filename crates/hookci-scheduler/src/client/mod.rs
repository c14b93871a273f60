//! Build client implementations and the request bodies of the runner
//! callback API they share with the HTTP layer.

pub mod local;
pub mod remote;

pub use local::LocalBuildClient;
pub use remote::RemoteBuildClient;

use hookci_core::BuildStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: BuildStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionBody {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionBody {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
