//! Build dispatch for hookci.
//!
//! Two ways to get a Queued build executed:
//! - [`BuildQueue`]: an in-process pending set drained by a fixed pool of workers
//! - [`Scheduler`]: polls the store and hands claimed builds to a
//!   [`BuildManager`](hookci_core::BuildManager), either [`LocalBuildManager`]
//!   (pipeline as a task) or [`HostBuildManager`] (runner subprocess)
//!
//! [`Dispatcher`] picks one at start-up and [`BuildService`] is the entry
//! point used by the HTTP layer.

pub mod client;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod service;
mod tokens;
mod worker;

pub use client::{LocalBuildClient, RemoteBuildClient};
pub use context::{BuildContext, pipeline_settings};
pub use dispatch::Dispatcher;
pub use error::{SchedulerError, SchedulerResult};
pub use manager::{HostBuildManager, HostSettings, LocalBuildManager};
pub use queue::BuildQueue;
pub use runner::LocalRunner;
pub use scheduler::{Scheduler, SchedulerSettings};
pub use service::BuildService;
