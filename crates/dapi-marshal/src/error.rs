//! Marshaling error types.

use thiserror::Error;

pub type MarshalResult<T> = Result<T, MarshalError>;

/// Errors raised while encoding or reconstructing a call envelope.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("malformed call envelope: {0}")]
    Malformed(String),

    #[error("unknown function {qualname} in module {module}")]
    UnknownFunction { module: String, qualname: String },

    #[error("unknown application method: {0}")]
    UnknownMethod(String),

    #[error("method reference without receiver state: {0}")]
    MissingReceiver(String),

    #[error("failed to encode call envelope: {0}")]
    Encode(String),
}
