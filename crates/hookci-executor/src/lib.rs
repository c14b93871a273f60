//! Build execution for hookci.
//!
//! - [`process`]: a single background loop supervising every spawned child process
//! - [`pipeline`]: clone, checkout, overrides, build script, archive
//! - [`log`]: the per-build log file

pub mod command;
pub mod error;
pub mod git;
pub mod log;
pub mod pipeline;
pub mod process;
pub mod workspace;

pub use error::{PipelineError, SupervisorError};
pub use log::BuildLog;
pub use pipeline::{BuildOutcome, BuildPipeline, PipelineSettings};
pub use process::{
    OutputMode, ProcessConfig, ProcessEventSink, ProcessSupervisor, StdinMode,
    DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
