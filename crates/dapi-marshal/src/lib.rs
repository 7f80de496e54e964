//! dapi-marshal: moving a function call across a process boundary.
//!
//! A call is shipped as a [`CallEnvelope`]: a JSON object naming the
//! function by reference plus its keyword arguments and routing flags.
//! The receiving process turns the reference back into something it can
//! invoke by looking it up in its [`FunctionRegistry`], which is built
//! once at startup from the set of invocable operations.
//!
//! # Wire format
//!
//! ```text
//! {
//!   "function": {"name": "restart", "module": "agent", "qualname": "Agent.restart",
//!                "type": "function"},
//!   "arguments": {"agent_id": ["001", "002"]},
//!   "request_type": "distributed_master",
//!   "wait_for_complete": false,
//!   "from_cluster": false,
//!   "is_async": false
//! }
//! ```
//!
//! Bound methods on the application identity carry the receiver's state
//! (`"receiver": {"kind": "application", "path": "/opt/app"}`) so the
//! receiver can be rebuilt without shared process state.

pub mod envelope;
pub mod error;
pub mod function;
pub mod registry;

pub use envelope::{CallEnvelope, DecodedCall};
pub use error::{MarshalError, MarshalResult};
pub use function::{AppIdentity, BoxFuture, DEFAULT_INSTALL_PATH, Function, FunctionKind, FunctionRef, HandlerResult, ReceiverState};
pub use registry::FunctionRegistry;
