//! Queue entry parsing.
//!
//! An entry reads `<peer>*<suffix> <call-json>`. `<peer>` names the node
//! that relayed the request, or [`UPSTREAM_PEER`] when it came over this
//! node's upstream channel. `<suffix>` is optional and opaque; it is echoed
//! in front of the reply token so the requester can match the answer.

use crate::error::{QueueError, QueueResult};

/// Peer name meaning "the upstream channel".
pub const UPSTREAM_PEER: &str = "None";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    Upstream,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEntry {
    pub peer: PeerTarget,
    pub suffix: Option<String>,
    pub payload: String,
}

impl RequestEntry {
    pub fn parse(raw: &str) -> QueueResult<Self> {
        let (header, payload) = raw
            .split_once(' ')
            .ok_or_else(|| QueueError::MalformedRequest("missing call payload".to_string()))?;

        let (peer, suffix) = match header.split_once('*') {
            Some((peer, suffix)) => (peer, Some(suffix.to_string())),
            None => (header, None),
        };
        if peer.is_empty() {
            return Err(QueueError::MalformedRequest("empty peer name".to_string()));
        }

        let peer = if peer == UPSTREAM_PEER {
            PeerTarget::Upstream
        } else {
            PeerTarget::Named(peer.to_string())
        };

        Ok(Self {
            peer,
            suffix,
            payload: payload.to_string(),
        })
    }

    /// Control message body announcing `token`: the suffix, a space, then
    /// the token. Without a suffix the body is the bare token.
    pub fn reply_body(&self, token: &[u8]) -> Vec<u8> {
        match &self.suffix {
            Some(suffix) => {
                let mut body = Vec::with_capacity(suffix.len() + 1 + token.len());
                body.extend_from_slice(suffix.as_bytes());
                body.push(b' ');
                body.extend_from_slice(token);
                body
            }
            None => token.to_vec(),
        }
    }
}
