//! dapi-queue: inbound API requests relayed by peer nodes.
//!
//! The transport layer pushes raw requests with [`RequestQueue::add_request`]
//! and returns immediately. A single [`RequestQueueWorker`] drains them one
//! at a time: it decodes the call, runs it through the router, and ships
//! the answer back to the node that asked.

pub mod entry;
pub mod error;
pub mod queue;

pub use entry::{PeerTarget, RequestEntry, UPSTREAM_PEER};
pub use error::{QueueError, QueueResult};
pub use queue::{RequestQueue, RequestQueueWorker};
