//! Core domain types and traits for the hookci build orchestrator.
//!
//! This crate contains:
//! - Build and repository records with the build state machine
//! - Deterministic on-disk paths for workspaces, artifacts and logs
//! - The `BuildData` transfer object handed to out-of-process runners
//! - Build tokens and repository secrets
//! - The `BuildClient` and `BuildManager` traits

pub mod build;
pub mod build_data;
pub mod client;
pub mod error;
pub mod id;
pub mod manager;
pub mod repository;
pub mod secret;
pub mod token;

pub use build::{Build, BuildPaths, BuildStatus, GitFolderHandling, NULL_COMMIT_SHA};
pub use build_data::BuildData;
pub use client::BuildClient;
pub use error::{Error, Result};
pub use id::{BuildId, RepositoryId};
pub use manager::BuildManager;
pub use repository::{InboundBuildRequest, NewRepository, Repository};
pub use token::BuildToken;
