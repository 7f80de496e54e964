//! dapi-core: shared types for the distributed API router.
//!
//! Holds the pieces every other crate in the workspace agrees on: the
//! routing mode of a call, the node identity snapshot, the normalized
//! response envelope, the host application's domain error, and the
//! cluster configuration file.

pub mod config;
pub mod error;
pub mod types;

pub use config::ClusterConfig;
pub use error::{AGENT_NOT_FOUND_CODE, DomainError, INTERNAL_ERROR_CODE, REQUEST_TIMEOUT_CODE};
pub use types::*;
