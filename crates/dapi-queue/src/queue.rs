//! Request queue and its single consumer.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use dapi_core::{DapiResponse, INTERNAL_ERROR_CODE};
use dapi_marshal::DecodedCall;
use dapi_router::context::{DAPI_ERROR_COMMAND, DAPI_RESULT_COMMAND, ERROR_TOKEN_PREFIX};
use dapi_router::{ClusterContext, DistributedCall, PeerChannel};

use crate::entry::{PeerTarget, RequestEntry};
use crate::error::{QueueError, QueueResult};

/// Producer side. Cheap to clone; every clone feeds the same worker.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RequestQueue {
    /// Create a queue and the worker that drains it.
    pub fn new(context: ClusterContext) -> (Self, RequestQueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, RequestQueueWorker { rx, context })
    }

    /// Enqueue a raw request. Never waits.
    pub fn add_request(&self, request: &[u8]) -> QueueResult<()> {
        info!(request = %String::from_utf8_lossy(request), "receiving request");
        self.tx
            .send(request.to_vec())
            .map_err(|_| QueueError::Closed)
    }
}

/// Consumer side: answers one request at a time.
pub struct RequestQueueWorker {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    context: ClusterContext,
}

impl RequestQueueWorker {
    /// Drain the queue until `shutdown` fires or every producer is gone.
    ///
    /// A request that cannot be processed is logged and dropped; the loop
    /// moves on to the next one.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("request queue worker started");

        loop {
            tokio::select! {
                request = self.rx.recv() => {
                    let Some(request) = request else {
                        debug!("all request producers dropped");
                        break;
                    };
                    if let Err(e) = self.process(&request).await {
                        error!(error = %e, "dropping API request");
                    }
                }
                _ = shutdown.changed() => {
                    info!("request queue worker shutting down");
                    break;
                }
            }
        }
    }

    async fn process(&self, request: &[u8]) -> QueueResult<()> {
        let raw = std::str::from_utf8(request)
            .map_err(|e| QueueError::MalformedRequest(format!("request is not UTF-8: {e}")))?;
        let entry = RequestEntry::parse(raw)?;
        let peer = self.peer_for(&entry.peer)?;

        match DecodedCall::decode(entry.payload.as_bytes(), &self.context.registry) {
            Ok(decoded) => {
                let mut call = DistributedCall::from_decoded(self.context.clone(), decoded);
                // Outside debug mode distribute() always yields an envelope.
                let response = call
                    .distribute()
                    .await
                    .unwrap_or_else(|e| e.to_response());
                self.reply(peer.as_ref(), &entry, &response).await
            }
            Err(e) => {
                // The requester still expects a reply.
                let response = DapiResponse::failure(INTERNAL_ERROR_CODE, e.to_string());
                if let Err(reply_err) = self.reply(peer.as_ref(), &entry, &response).await {
                    warn!(error = %reply_err, "cannot report decode failure to peer");
                }
                Err(QueueError::Decode(e))
            }
        }
    }

    fn peer_for(&self, target: &PeerTarget) -> QueueResult<Arc<dyn PeerChannel>> {
        match target {
            PeerTarget::Upstream => self
                .context
                .upstream
                .clone()
                .ok_or_else(|| QueueError::UnknownPeer("upstream".to_string())),
            PeerTarget::Named(name) => self
                .context
                .peers
                .peer(name)
                .ok_or_else(|| QueueError::UnknownPeer(name.clone())),
        }
    }

    /// Ship the response, then announce the send-result token. A failed
    /// ship is still announced with `dapi_err`.
    async fn reply(
        &self,
        peer: &dyn PeerChannel,
        entry: &RequestEntry,
        response: &DapiResponse,
    ) -> QueueResult<()> {
        let token = match peer.send_string(&response.to_vec()?).await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "cannot send API response");
                let token = format!("Error sending API response: {e}");
                if let Err(notice_err) = peer
                    .send_request(DAPI_ERROR_COMMAND, &entry.reply_body(token.as_bytes()), DAPI_ERROR_COMMAND)
                    .await
                {
                    warn!(error = %notice_err, "cannot announce failed API response");
                }
                return Err(e.into());
            }
        };

        let command = if token.starts_with(ERROR_TOKEN_PREFIX) {
            error!(token = %String::from_utf8_lossy(&token), "cannot send API response");
            DAPI_ERROR_COMMAND
        } else {
            DAPI_RESULT_COMMAND
        };

        let result = peer
            .send_request(command, &entry.reply_body(&token), DAPI_ERROR_COMMAND)
            .await?;
        if result.starts_with(ERROR_TOKEN_PREFIX) {
            error!(result = %String::from_utf8_lossy(&result), "peer rejected API response notice");
        }
        Ok(())
    }
}
