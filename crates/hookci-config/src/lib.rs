//! KDL configuration parsing for hookci.
//!
//! This crate handles parsing of:
//! - The server configuration file (`hookci.kdl`)
//! - `${env.NAME}` interpolation inside string values

pub mod error;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DispatchMode, MIN_PROCESS_POLL, RepositoryConfig, SshConfig, SystemConfig,
    load_system_config, parse_system_config, parse_system_config_with,
};
pub use variables::VariableContext;
