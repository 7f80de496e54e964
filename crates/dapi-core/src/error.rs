//! Host application error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code reported for any failure that has no more specific domain code.
pub const INTERNAL_ERROR_CODE: i64 = 1000;

/// Code reported when a locally executed request exceeds its deadline.
pub const REQUEST_TIMEOUT_CODE: i64 = 3021;

/// Code reported when an agent id is not present in the agent directory.
pub const AGENT_NOT_FOUND_CODE: i64 = 1701;

/// An error raised by an invocable operation, carrying the numeric code
/// that ends up in the response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("error {code}: {message}")]
pub struct DomainError {
    pub code: i64,
    pub message: String,
}

impl DomainError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR_CODE, message)
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(
            AGENT_NOT_FOUND_CODE,
            format!("Agent does not exist: {agent_id}"),
        )
    }

    pub fn request_timeout() -> Self {
        Self::new(
            REQUEST_TIMEOUT_CODE,
            "Timeout executing API request",
        )
    }
}
