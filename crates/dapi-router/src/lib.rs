//! dapi-router: decides where an API call runs and gets it an answer.
//!
//! A [`DistributedCall`] evaluates its route once:
//!
//! - **local**: the function runs in this process through the
//!   [`LocalExecutor`] under the API request deadline.
//! - **remote**: a worker ships the call to the master over its upstream
//!   channel and returns the master's answer unchanged.
//! - **forward**: the master resolves which nodes hold the data, sends one
//!   sub-call to each, and merges the answers with [`merge_results`]
//!   before re-paginating them.
//!
//! Transport, membership and agent storage are reached through the traits
//! in [`context`].

pub mod call;
pub mod context;
pub mod error;
pub mod executor;
pub mod merge;
pub mod paginate;
pub mod solver;

pub use call::{DistributedCall, Route, route_for};
pub use context::{
    AgentDirectory, AgentOverview, AgentQuery, ClusterContext, ClusterHealth, NodeIdentity,
    PeerChannel, PeerDirectory, PeerError, StaticAgentDirectory, StaticHealth,
};
pub use error::{DapiError, DapiResult};
pub use executor::LocalExecutor;
pub use merge::{MergePolicy, merge_results};
pub use paginate::paginate_items;
pub use solver::{SolverMap, resolve_solver_nodes};
