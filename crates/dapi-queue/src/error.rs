use thiserror::Error;

use dapi_marshal::MarshalError;
use dapi_router::PeerError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("cannot decode call: {0}")]
    Decode(#[from] MarshalError),

    #[error("peer channel error: {0}")]
    Peer(#[from] PeerError),

    #[error("cannot encode response: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request queue closed")]
    Closed,
}

pub type QueueResult<T> = Result<T, QueueError>;
