//! Router error types.

use std::time::Duration;

use thiserror::Error;

use dapi_core::{DapiResponse, DomainError, INTERNAL_ERROR_CODE, REQUEST_TIMEOUT_CODE};
use dapi_marshal::MarshalError;

use crate::context::PeerError;

/// Errors that can occur while routing or executing a distributed call.
#[derive(Debug, Error)]
pub enum DapiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error("peer channel error: {0}")]
    Peer(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PeerError> for DapiError {
    fn from(err: PeerError) -> Self {
        DapiError::Peer(err.to_string())
    }
}

impl DapiError {
    /// The code this error reports in a response envelope.
    pub fn code(&self) -> i64 {
        match self {
            DapiError::Domain(e) => e.code,
            DapiError::Timeout(_) => REQUEST_TIMEOUT_CODE,
            _ => INTERNAL_ERROR_CODE,
        }
    }

    pub fn to_response(&self) -> DapiResponse {
        match self {
            DapiError::Domain(e) => DapiResponse::from(e),
            DapiError::Timeout(_) => DapiResponse::from(&DomainError::request_timeout()),
            other => DapiResponse::failure(INTERNAL_ERROR_CODE, other.to_string()),
        }
    }
}

pub type DapiResult<T> = Result<T, DapiError>;
