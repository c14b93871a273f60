//! Build manager implementations.

pub mod host;
pub mod local;

pub use host::{HostBuildManager, HostSettings};
pub use local::LocalBuildManager;
