//! Collaborators the router consumes, and the context bundling them.
//!
//! Transport, membership and agent storage live outside this crate. The
//! router only sees them through the narrow traits below, which keeps the
//! routing logic testable with in-memory doubles.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dapi_core::{ClusterConfig, DomainError, NodeInfo, SortSpec};
use dapi_marshal::FunctionRegistry;

use crate::executor::LocalExecutor;
use crate::merge::MergePolicy;

/// Command tag for a call a worker hands to the master.
pub const DAPI_COMMAND: &[u8] = b"dapi";
/// Command tag for a call the master forwards to a worker.
pub const DAPI_FORWARD_COMMAND: &[u8] = b"dapi_forward";
/// Control message announcing a successfully shipped reply.
pub const DAPI_RESULT_COMMAND: &[u8] = b"dapi_res";
/// Control message announcing a failed reply.
pub const DAPI_ERROR_COMMAND: &[u8] = b"dapi_err";

/// Prefix of send-result tokens that report a failed hand-off.
pub const ERROR_TOKEN_PREFIX: &[u8] = b"Error";

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer channel closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

// ── Peer channels ──────────────────────────────────────────────────

/// A point-to-point channel to one peer node.
///
/// Handshake, keepalive and reconnection belong to the implementation.
/// Calls are never retried by the router.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// One request, one response.
    async fn execute(
        &self,
        command: &[u8],
        payload: &[u8],
        wait_for_complete: bool,
    ) -> Result<Vec<u8>, PeerError>;

    /// Ship a payload and return the send-result token. Tokens beginning
    /// with [`ERROR_TOKEN_PREFIX`] report a local hand-off failure.
    async fn send_string(&self, payload: &[u8]) -> Result<Vec<u8>, PeerError>;

    /// Send a control message.
    async fn send_request(
        &self,
        command: &[u8],
        body: &[u8],
        error_tag: &[u8],
    ) -> Result<Vec<u8>, PeerError>;
}

/// Named channels to the peers this node talks to.
pub trait PeerDirectory: Send + Sync {
    fn peer(&self, name: &str) -> Option<Arc<dyn PeerChannel>>;
}

impl PeerDirectory for HashMap<String, Arc<dyn PeerChannel>> {
    fn peer(&self, name: &str) -> Option<Arc<dyn PeerChannel>> {
        self.get(name).cloned()
    }
}

// ── Node identity and cluster health ───────────────────────────────

pub trait NodeIdentity: Send + Sync {
    fn node_info(&self) -> NodeInfo;
}

impl NodeIdentity for NodeInfo {
    fn node_info(&self) -> NodeInfo {
        self.clone()
    }
}

pub trait ClusterHealth: Send + Sync {
    /// True when the cluster is disabled or cannot currently serve
    /// cross-node requests.
    fn is_degraded(&self) -> bool;
}

/// Fixed health answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticHealth {
    pub degraded: bool,
}

impl ClusterHealth for StaticHealth {
    fn is_degraded(&self) -> bool {
        self.degraded
    }
}

// ── Agent directory ────────────────────────────────────────────────

/// One row of the agent overview: which node an agent reports to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOverview {
    pub id: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentQuery {
    /// Restrict to these ids. `None` means every agent.
    pub ids: Option<Vec<String>>,
    pub sort: Option<SortSpec>,
}

pub trait AgentDirectory: Send + Sync {
    fn agents_overview(&self, query: &AgentQuery) -> Result<Vec<AgentOverview>, DomainError>;

    /// Node an agent reports to.
    fn agent_node(&self, agent_id: &str) -> Result<String, DomainError>;
}

/// In-memory agent directory.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDirectory {
    agents: Vec<AgentOverview>,
}

impl StaticAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, id: &str, node_name: &str) -> Self {
        self.agents.push(AgentOverview {
            id: id.to_string(),
            node_name: node_name.to_string(),
        });
        self
    }

    /// Distinct node names that own at least one agent.
    pub fn nodes(&self) -> BTreeSet<String> {
        self.agents.iter().map(|a| a.node_name.clone()).collect()
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn agents_overview(&self, query: &AgentQuery) -> Result<Vec<AgentOverview>, DomainError> {
        let mut agents: Vec<AgentOverview> = match &query.ids {
            Some(ids) => self
                .agents
                .iter()
                .filter(|a| ids.contains(&a.id))
                .cloned()
                .collect(),
            None => self.agents.clone(),
        };

        if let Some(sort) = &query.sort {
            if sort.fields.iter().any(|f| f == "node_name" || f == "node") {
                agents.sort_by(|a, b| a.node_name.cmp(&b.node_name));
                if sort.order == dapi_core::SortOrder::Desc {
                    agents.reverse();
                }
            }
        }
        Ok(agents)
    }

    fn agent_node(&self, agent_id: &str) -> Result<String, DomainError> {
        self.agents
            .iter()
            .find(|a| a.id == agent_id)
            .map(|a| a.node_name.clone())
            .ok_or_else(|| DomainError::agent_not_found(agent_id))
    }
}

// ── Context ────────────────────────────────────────────────────────

/// Everything a distributed call needs from its hosting process.
///
/// Cheap to clone; every collaborator is shared behind an `Arc`.
#[derive(Clone)]
pub struct ClusterContext {
    pub config: Arc<ClusterConfig>,
    pub identity: Arc<dyn NodeIdentity>,
    pub health: Arc<dyn ClusterHealth>,
    pub directory: Arc<dyn AgentDirectory>,
    /// Channel to this node's single designated peer (the master, from a worker).
    pub upstream: Option<Arc<dyn PeerChannel>>,
    /// Channels to named peers (the workers, from the master).
    pub peers: Arc<dyn PeerDirectory>,
    pub registry: Arc<FunctionRegistry>,
    pub executor: LocalExecutor,
    pub merge_policy: Arc<MergePolicy>,
}

impl ClusterContext {
    /// Create a context with a healthy cluster, no agents and no peers.
    pub fn new(
        config: ClusterConfig,
        identity: Arc<dyn NodeIdentity>,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        let executor = LocalExecutor::new(config.executor.max_blocking_workers);
        let merge_policy = MergePolicy::from_config(&config.merge);
        Self {
            config: Arc::new(config),
            identity,
            health: Arc::new(StaticHealth::default()),
            directory: Arc::new(StaticAgentDirectory::new()),
            upstream: None,
            peers: Arc::new(HashMap::<String, Arc<dyn PeerChannel>>::new()),
            registry,
            executor,
            merge_policy: Arc::new(merge_policy),
        }
    }

    pub fn with_health(mut self, health: Arc<dyn ClusterHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn PeerChannel>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn with_peers(mut self, peers: Arc<dyn PeerDirectory>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = Arc::new(policy);
        self
    }
}
