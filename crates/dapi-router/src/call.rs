//! Distributed call: picks where a call runs and fans it out when the
//! data lives on several nodes.
//!
//! The routing decision is evaluated once per call and is a pure function
//! of the node identity, the routing mode, the `from_cluster` flag and two
//! cluster-level switches; see [`route_for`].

use std::time::Instant;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, error, warn};

use dapi_core::{Arguments, DapiResponse, NodeInfo, RoutingMode};
use dapi_marshal::{CallEnvelope, DecodedCall, Function};

use crate::context::{ClusterContext, DAPI_COMMAND, DAPI_FORWARD_COMMAND};
use crate::error::{DapiError, DapiResult};
use crate::merge::merge_results;
use crate::paginate::paginate_items;
use crate::solver::{SolverMap, resolve_solver_nodes};

/// Node name the agent directory reports for agents that never connected.
const UNKNOWN_NODE: &str = "unknown";

/// Where a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// In this process.
    Local,
    /// Fanned out from the master to the solver nodes, answers merged.
    Forward,
    /// Shipped once to the master.
    Remote,
}

/// The routing decision. First match wins:
///
/// 1. `Local` when the distributed API is disabled, the cluster is
///    degraded, the mode is `local_any`, the mode is `local_master` on the
///    master, or the mode is `distributed_master` and the call already
///    arrived through a forward.
/// 2. `Forward` for `distributed_master` on the master.
/// 3. `Remote` otherwise.
pub fn route_for(
    node: &NodeInfo,
    mode: RoutingMode,
    from_cluster: bool,
    dapi_enabled: bool,
    cluster_degraded: bool,
) -> Route {
    let local = !dapi_enabled
        || cluster_degraded
        || mode == RoutingMode::LocalAny
        || (mode == RoutingMode::LocalMaster && node.is_master())
        || (mode == RoutingMode::DistributedMaster && from_cluster);

    if local {
        Route::Local
    } else if mode == RoutingMode::DistributedMaster && node.is_master() {
        Route::Forward
    } else {
        Route::Remote
    }
}

/// One API request on its way to an answer.
#[derive(Clone)]
pub struct DistributedCall {
    function: Function,
    arguments: Arguments,
    routing_mode: RoutingMode,
    wait_for_complete: bool,
    from_cluster: bool,
    is_async: bool,
    debug: bool,
    request_id: u16,
    node: NodeInfo,
    context: ClusterContext,
}

impl std::fmt::Debug for DistributedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCall")
            .field("request_id", &self.request_id)
            .field("function", self.function.reference())
            .field("routing_mode", &self.routing_mode)
            .field("from_cluster", &self.from_cluster)
            .field("node", &self.node.name)
            .finish()
    }
}

impl DistributedCall {
    /// Create a call. The node identity is read once, here.
    pub fn new(
        context: ClusterContext,
        function: Function,
        arguments: Arguments,
        routing_mode: RoutingMode,
    ) -> Self {
        let node = context.identity.node_info();
        Self {
            function,
            arguments,
            routing_mode,
            wait_for_complete: false,
            from_cluster: false,
            is_async: false,
            debug: false,
            request_id: rand::rng().random_range(0..1024),
            node,
            context,
        }
    }

    /// Rebuild a call that arrived over a peer channel.
    pub fn from_decoded(context: ClusterContext, decoded: DecodedCall) -> Self {
        Self::new(context, decoded.function, decoded.arguments, decoded.request_type)
            .with_wait_for_complete(decoded.wait_for_complete)
            .with_from_cluster(decoded.from_cluster)
            .with_async(decoded.is_async)
    }

    pub fn with_wait_for_complete(mut self, wait: bool) -> Self {
        self.wait_for_complete = wait;
        self
    }

    pub fn with_from_cluster(mut self, from_cluster: bool) -> Self {
        self.from_cluster = from_cluster;
        self
    }

    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// In debug mode failures are returned as `Err` instead of being
    /// folded into an error envelope.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn routing_mode(&self) -> RoutingMode {
        self.routing_mode
    }

    pub fn from_cluster(&self) -> bool {
        self.from_cluster
    }

    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn route(&self) -> Route {
        route_for(
            &self.node,
            self.routing_mode,
            self.from_cluster,
            self.context.config.distributed_api.enabled,
            self.context.health.is_degraded(),
        )
    }

    /// Wire form of this call.
    pub fn to_envelope(&self) -> CallEnvelope {
        CallEnvelope {
            function: self.function.reference().clone(),
            arguments: self.arguments.clone(),
            request_type: self.routing_mode,
            wait_for_complete: self.wait_for_complete,
            from_cluster: self.from_cluster,
            is_async: self.is_async,
        }
    }

    /// Route and execute the call.
    ///
    /// Outside debug mode this always returns `Ok`: failures are reported
    /// through the envelope's error code.
    pub async fn distribute(&mut self) -> DapiResult<DapiResponse> {
        let route = self.route();
        debug!(
            request_id = self.request_id,
            function = %self.function.reference(),
            mode = %self.routing_mode,
            node = %self.node.name,
            ?route,
            "distributing request"
        );

        let result = match route {
            Route::Local => self.execute_local().await,
            Route::Forward => self.forward().await,
            Route::Remote => self.execute_remote().await,
        };
        self.envelope_or_error(result)
    }

    fn envelope_or_error(&self, result: DapiResult<DapiResponse>) -> DapiResult<DapiResponse> {
        match result {
            Ok(response) => Ok(response),
            Err(e) if self.debug => Err(e),
            Err(e) => {
                match &e {
                    DapiError::Domain(_) | DapiError::Timeout(_) => {
                        debug!(request_id = self.request_id, error = %e, "request failed");
                    }
                    _ => {
                        error!(
                            request_id = self.request_id,
                            function = %self.function.reference(),
                            error = %e,
                            "error executing API request"
                        );
                    }
                }
                Ok(e.to_response())
            }
        }
    }

    /// Run the function in this process under the API request deadline.
    async fn execute_local(&self) -> DapiResult<DapiResponse> {
        let deadline = (!self.wait_for_complete).then(|| self.context.config.api_request_timeout());
        debug!(
            request_id = self.request_id,
            ?deadline,
            is_async = self.is_async,
            blocking = self.function.is_blocking(),
            "starting to execute request locally"
        );

        let started = Instant::now();
        let data = self
            .context
            .executor
            .run(&self.function, self.arguments.clone(), deadline)
            .await?;

        debug!(
            request_id = self.request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished executing request locally"
        );
        Ok(DapiResponse::success(data))
    }

    /// Ship the call once to the master and return its answer.
    async fn execute_remote(&self) -> DapiResult<DapiResponse> {
        let upstream = self
            .context
            .upstream
            .as_ref()
            .ok_or_else(|| DapiError::Peer("no channel to the master node".to_string()))?;

        let payload = self.to_envelope().to_vec()?;
        let reply = upstream
            .execute(DAPI_COMMAND, &payload, self.wait_for_complete)
            .await?;

        DapiResponse::from_slice(&reply)
            .map_err(|e| DapiError::Peer(format!("invalid response from master: {e}")))
    }

    /// Fan the call out to its solver nodes and merge their answers.
    async fn forward(&mut self) -> DapiResult<DapiResponse> {
        let nodes = self.solver_nodes()?;
        self.from_cluster = true;

        if nodes.is_empty() {
            debug!(request_id = self.request_id, "no solver nodes, executing locally");
            return self.execute_local().await;
        }

        let single = nodes.len() == 1;
        let mut handles = Vec::with_capacity(nodes.len());
        for (node_name, agent_ids) in nodes {
            let sub_call = self.for_node(&agent_ids);
            // Spawned so that cancelling the caller does not abandon
            // forwards already in flight.
            handles.push((node_name.clone(), tokio::spawn(sub_call.forward_to(node_name))));
        }

        let mut responses = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for (node_name, handle) in handles {
            match handle.await {
                Ok(Ok(response)) => responses.push(response),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(request_id = self.request_id, node = %node_name, error = %e, "forward task failed");
                    let err = DapiError::Internal(format!("forward to {node_name} failed: {e}"));
                    if self.debug {
                        first_error.get_or_insert(err);
                    } else {
                        responses.push(err.to_response().into_value());
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if single {
            let response = responses.pop().unwrap_or(Value::Null);
            return serde_json::from_value(response)
                .map_err(|e| DapiError::Internal(format!("invalid forwarded response: {e}")));
        }

        let mut merged = merge_results(responses, &self.context.merge_policy);
        paginate_items(
            &mut merged,
            &self.arguments,
            self.context.config.pagination.default_limit,
        );
        serde_json::from_value(Value::Object(merged))
            .map_err(|e| DapiError::Internal(format!("invalid merged response: {e}")))
    }

    fn solver_nodes(&mut self) -> DapiResult<SolverMap> {
        let nodes = resolve_solver_nodes(
            &mut self.arguments,
            self.context.directory.as_ref(),
            &self.node.name,
        )?;
        debug!(request_id = self.request_id, nodes = ?nodes.keys().collect::<Vec<_>>(), "resolved solver nodes");
        Ok(nodes)
    }

    /// Copy of this call scoped to one solver node's agents.
    fn for_node(&self, agent_ids: &[Value]) -> Self {
        let mut sub_call = self.clone();
        let replace = match sub_call.arguments.get("agent_id") {
            None | Some(Value::Array(_)) => true,
            Some(_) => false,
        };
        if !agent_ids.is_empty() && replace {
            sub_call
                .arguments
                .insert("agent_id".to_string(), Value::Array(agent_ids.to_vec()));
        }
        sub_call
    }

    /// Answer for one solver node, as a raw envelope value.
    ///
    /// Failures become error envelopes so that one node cannot sink the
    /// merge; in debug mode they are returned instead.
    async fn forward_to(self, node_name: String) -> DapiResult<Value> {
        let result = if node_name.is_empty() || node_name == UNKNOWN_NODE || node_name == self.node.name {
            // `from_cluster` is set, so the routing decision for this copy
            // is always local.
            self.execute_local().await.map(DapiResponse::into_value)
        } else {
            self.send_to_peer(&node_name).await
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) if self.debug => Err(e),
            Err(e) => {
                warn!(request_id = self.request_id, node = %node_name, error = %e, "forwarded request failed");
                Ok(e.to_response().into_value())
            }
        }
    }

    async fn send_to_peer(&self, node_name: &str) -> DapiResult<Value> {
        let peer = self
            .context
            .peers
            .peer(node_name)
            .ok_or_else(|| DapiError::Peer(format!("no channel to node {node_name}")))?;

        let payload = format!("{} {}", node_name, self.to_envelope().to_json_string()?);
        debug!(request_id = self.request_id, node = %node_name, "forwarding request");

        let reply = peer
            .execute(DAPI_FORWARD_COMMAND, payload.as_bytes(), self.wait_for_complete)
            .await?;
        serde_json::from_slice(&reply)
            .map_err(|e| DapiError::Peer(format!("invalid response from {node_name}: {e}")))
    }
}
