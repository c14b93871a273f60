//! HTTP server for hookci.
//!
//! Serves the inbound build hook, the operator API and the callback API
//! that build runners report through.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
