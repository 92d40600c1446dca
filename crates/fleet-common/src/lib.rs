//! # Fleet Common
//!
//! Shared types, errors, and protocol constants used across fleet
//! coordination components.
//!
//! ## Modules
//! - `types` - Node, report, and RPC envelope structures
//! - `error` - Cluster error taxonomy
//! - `constants` - Protocol and default configuration constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::ClusterError;
pub use types::*;

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;
