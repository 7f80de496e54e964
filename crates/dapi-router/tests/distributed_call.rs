//! Distributed call integration tests.
//!
//! A small in-process cluster: one master, two workers reached through
//! recording peer channels, and an in-memory agent directory. No sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use dapi_core::{
    Arguments, ClusterConfig, DomainError, INTERNAL_ERROR_CODE, NodeInfo, REQUEST_TIMEOUT_CODE,
    RoutingMode,
};
use dapi_marshal::{CallEnvelope, FunctionRegistry};
use dapi_router::{
    ClusterContext, DapiError, DistributedCall, PeerChannel, PeerError, Route,
    StaticAgentDirectory, StaticHealth,
};

// ── Fixtures ───────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Peer channel that records every call and answers with a canned reply.
/// `reply: None` simulates a dropped connection.
struct RecordingPeer {
    reply: Option<Value>,
    calls: Mutex<Vec<(Vec<u8>, String, bool)>>,
}

impl RecordingPeer {
    fn answering(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Vec<u8>, String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerChannel for RecordingPeer {
    async fn execute(
        &self,
        command: &[u8],
        payload: &[u8],
        wait_for_complete: bool,
    ) -> Result<Vec<u8>, PeerError> {
        self.calls.lock().unwrap().push((
            command.to_vec(),
            String::from_utf8_lossy(payload).into_owned(),
            wait_for_complete,
        ));
        match &self.reply {
            Some(reply) => Ok(serde_json::to_vec(reply).unwrap()),
            None => Err(PeerError::Closed),
        }
    }

    async fn send_string(&self, _payload: &[u8]) -> Result<Vec<u8>, PeerError> {
        Ok(b"ok".to_vec())
    }

    async fn send_request(
        &self,
        _command: &[u8],
        _body: &[u8],
        _error_tag: &[u8],
    ) -> Result<Vec<u8>, PeerError> {
        Ok(b"ok".to_vec())
    }
}

fn args(value: Value) -> Arguments {
    value.as_object().cloned().unwrap()
}

fn registry() -> Arc<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    registry
        .register_blocking("agent", "get_agents", |args| {
            let ids = args
                .get("agent_id")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let items: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
            Ok(json!({"items": items, "totalItems": ids.len()}))
        })
        .register_blocking("agent", "slow", |_| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(json!("finished"))
        })
        .register_blocking("agent", "missing", |args| {
            let id = args.get("agent_id").and_then(Value::as_str).unwrap_or("?");
            Err(DomainError::agent_not_found(id))
        });
    Arc::new(registry)
}

fn directory() -> Arc<StaticAgentDirectory> {
    Arc::new(
        StaticAgentDirectory::new()
            .with_agent("000", "master-node")
            .with_agent("001", "worker1")
            .with_agent("002", "worker2"),
    )
}

fn worker_reply(id: &str) -> Value {
    json!({"data": {"items": [{"id": id}], "totalItems": 1}, "error": 0})
}

struct Cluster {
    context: ClusterContext,
    worker1: Arc<RecordingPeer>,
    worker2: Arc<RecordingPeer>,
}

fn master_cluster(config: ClusterConfig, worker2: Arc<RecordingPeer>) -> Cluster {
    let worker1 = RecordingPeer::answering(worker_reply("001"));
    let mut peers: HashMap<String, Arc<dyn PeerChannel>> = HashMap::new();
    peers.insert("worker1".to_string(), worker1.clone());
    peers.insert("worker2".to_string(), worker2.clone());

    let context = ClusterContext::new(config, Arc::new(NodeInfo::master("master-node")), registry())
        .with_directory(directory())
        .with_peers(Arc::new(peers));
    Cluster {
        context,
        worker1,
        worker2,
    }
}

fn call(context: &ClusterContext, qualname: &str, arguments: Value, mode: RoutingMode) -> DistributedCall {
    let function = context.registry.function("agent", qualname).unwrap();
    DistributedCall::new(context.clone(), function, args(arguments), mode)
}

fn short_timeout() -> ClusterConfig {
    ClusterConfig::from_toml_str(
        r#"
[intervals.communication]
timeout_api_request = 0.05
"#,
    )
    .unwrap()
}

// ── Local execution ────────────────────────────────────────────────

#[tokio::test]
async fn local_call_exceeding_deadline_reports_timeout() -> anyhow::Result<()> {
    init_tracing();
    let context = ClusterContext::new(short_timeout(), Arc::new(NodeInfo::worker("worker1")), registry());

    let mut c = call(&context, "slow", json!({}), RoutingMode::LocalAny);
    assert_eq!(c.route(), Route::Local);
    let response = c.distribute().await?;
    assert_eq!(response.error, REQUEST_TIMEOUT_CODE);
    assert!(response.data.is_none());
    Ok(())
}

#[tokio::test]
async fn async_flag_does_not_bypass_the_deadline_for_blocking_handlers() -> anyhow::Result<()> {
    init_tracing();
    let context = ClusterContext::new(short_timeout(), Arc::new(NodeInfo::master("master-node")), registry());

    let started = std::time::Instant::now();
    let mut c = call(&context, "slow", json!({}), RoutingMode::LocalAny).with_async(true);
    let response = c.distribute().await?;
    assert_eq!(response.error, REQUEST_TIMEOUT_CODE);
    assert!(response.data.is_none());
    assert!(started.elapsed() < Duration::from_millis(250));
    Ok(())
}

#[tokio::test]
async fn wait_for_complete_lifts_the_deadline() -> anyhow::Result<()> {
    init_tracing();
    let context = ClusterContext::new(short_timeout(), Arc::new(NodeInfo::worker("worker1")), registry());

    let mut c = call(&context, "slow", json!({}), RoutingMode::LocalAny).with_wait_for_complete(true);
    let response = c.distribute().await?;
    assert!(response.is_success());
    assert_eq!(response.data, Some(json!("finished")));
    Ok(())
}

#[tokio::test]
async fn domain_error_becomes_envelope_unless_debug() -> anyhow::Result<()> {
    init_tracing();
    let context = ClusterContext::new(ClusterConfig::default(), Arc::new(NodeInfo::master("master-node")), registry());

    let mut c = call(&context, "missing", json!({"agent_id": "042"}), RoutingMode::LocalAny);
    let response = c.distribute().await?;
    assert_eq!(response.error, dapi_core::AGENT_NOT_FOUND_CODE);

    let mut c = call(&context, "missing", json!({"agent_id": "042"}), RoutingMode::LocalAny).with_debug(true);
    let err = c.distribute().await.unwrap_err();
    assert!(matches!(err, DapiError::Domain(ref e) if e.code == dapi_core::AGENT_NOT_FOUND_CODE));
    Ok(())
}

#[tokio::test]
async fn disabled_distributed_api_runs_locally_on_a_worker() -> anyhow::Result<()> {
    init_tracing();
    let config = ClusterConfig::from_toml_str("[distributed_api]\nenabled = false\n")?;
    let upstream = RecordingPeer::answering(json!({"data": "from master", "error": 0}));
    let context = ClusterContext::new(config, Arc::new(NodeInfo::worker("worker1")), registry())
        .with_upstream(upstream.clone());

    let mut c = call(&context, "get_agents", json!({"agent_id": ["001"]}), RoutingMode::LocalMaster);
    let response = c.distribute().await?;
    assert_eq!(response.data, Some(json!({"items": [{"id": "001"}], "totalItems": 1})));
    assert!(upstream.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn degraded_cluster_runs_locally_on_the_master() -> anyhow::Result<()> {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::answering(worker_reply("002")));
    let context = cluster
        .context
        .clone()
        .with_health(Arc::new(StaticHealth { degraded: true }));

    let mut c = call(&context, "get_agents", json!({"agent_id": ["001", "002"]}), RoutingMode::DistributedMaster);
    assert_eq!(c.route(), Route::Local);
    c.distribute().await?;
    assert!(cluster.worker1.calls().is_empty());
    assert!(cluster.worker2.calls().is_empty());
    Ok(())
}

// ── Remote execution ───────────────────────────────────────────────

#[tokio::test]
async fn worker_ships_master_calls_upstream() -> anyhow::Result<()> {
    init_tracing();
    let upstream = RecordingPeer::answering(json!({"data": {"affected_items": ["001"]}, "error": 0}));
    let context = ClusterContext::new(ClusterConfig::default(), Arc::new(NodeInfo::worker("worker1")), registry())
        .with_upstream(upstream.clone());

    let mut c = call(&context, "get_agents", json!({"agent_id": ["001"]}), RoutingMode::DistributedMaster)
        .with_wait_for_complete(true);
    assert_eq!(c.route(), Route::Remote);
    let response = c.distribute().await?;
    assert_eq!(response.data, Some(json!({"affected_items": ["001"]})));

    let calls = upstream.calls();
    assert_eq!(calls.len(), 1);
    let (command, payload, wait) = &calls[0];
    assert_eq!(command.as_slice(), b"dapi");
    assert!(*wait);
    let envelope = CallEnvelope::from_json_str(payload)?;
    assert_eq!(envelope.request_type, RoutingMode::DistributedMaster);
    assert!(!envelope.from_cluster);
    assert_eq!(envelope.function.qualname, "get_agents");
    Ok(())
}

#[tokio::test]
async fn worker_without_upstream_reports_internal_error() -> anyhow::Result<()> {
    init_tracing();
    let context = ClusterContext::new(ClusterConfig::default(), Arc::new(NodeInfo::worker("worker1")), registry());

    let mut c = call(&context, "get_agents", json!({}), RoutingMode::LocalMaster);
    let response = c.distribute().await?;
    assert_eq!(response.error, INTERNAL_ERROR_CODE);
    Ok(())
}

#[tokio::test]
async fn forwarded_call_on_a_worker_runs_locally() -> anyhow::Result<()> {
    init_tracing();
    let upstream = RecordingPeer::answering(json!({"error": 0}));
    let context = ClusterContext::new(ClusterConfig::default(), Arc::new(NodeInfo::worker("worker1")), registry())
        .with_upstream(upstream.clone());

    let mut c = call(&context, "get_agents", json!({"agent_id": ["001"]}), RoutingMode::DistributedMaster)
        .with_from_cluster(true);
    let response = c.distribute().await?;
    assert_eq!(response.data, Some(json!({"items": [{"id": "001"}], "totalItems": 1})));
    assert!(upstream.calls().is_empty());
    Ok(())
}

// ── Forwarding ─────────────────────────────────────────────────────

#[tokio::test]
async fn fan_out_merges_and_paginates() -> anyhow::Result<()> {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::answering(worker_reply("002")));

    let mut c = call(
        &cluster.context,
        "get_agents",
        json!({
            "agent_id": ["000", "001", "002"],
            "limit": 2,
            "sort": {"fields": ["id"], "order": "desc"}
        }),
        RoutingMode::DistributedMaster,
    );
    assert_eq!(c.route(), Route::Forward);
    let response = c.distribute().await?;

    assert!(response.is_success());
    assert_eq!(
        response.data,
        Some(json!({"items": [{"id": "002"}, {"id": "001"}], "totalItems": 3}))
    );

    let calls = cluster.worker1.calls();
    assert_eq!(calls.len(), 1);
    let (command, payload, _) = &calls[0];
    assert_eq!(command.as_slice(), b"dapi_forward");
    let (node, body) = payload.split_once(' ').unwrap();
    assert_eq!(node, "worker1");
    let envelope = CallEnvelope::from_json_str(body)?;
    assert!(envelope.from_cluster);
    assert_eq!(envelope.arguments["agent_id"], json!(["001"]));
    assert_eq!(cluster.worker2.calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn forward_to_self_never_touches_a_peer() -> anyhow::Result<()> {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::answering(worker_reply("002")));

    let mut c = call(
        &cluster.context,
        "get_agents",
        json!({"node_id": "master-node"}),
        RoutingMode::DistributedMaster,
    );
    let response = c.distribute().await?;

    assert_eq!(response.data, Some(json!({"items": [], "totalItems": 0})));
    assert!(cluster.worker1.calls().is_empty());
    assert!(cluster.worker2.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn single_solver_reply_is_returned_unmerged() -> anyhow::Result<()> {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::answering(worker_reply("002")));

    let mut c = call(&cluster.context, "get_agents", json!({"agent_id": "002", "limit": 0}), RoutingMode::DistributedMaster);
    let response = c.distribute().await?;

    // A limit of zero would empty the list if the reply went through pagination.
    assert_eq!(response.data, Some(json!({"items": [{"id": "002"}], "totalItems": 1})));
    let (_, payload, _) = &cluster.worker2.calls()[0];
    let envelope = CallEnvelope::from_json_str(payload.split_once(' ').unwrap().1)?;
    assert_eq!(envelope.arguments["agent_id"], json!("002"));
    Ok(())
}

#[tokio::test]
async fn unreachable_worker_is_merged_as_an_error() -> anyhow::Result<()> {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::broken());

    let mut c = call(&cluster.context, "get_agents", json!({"agent_id": ["001", "002"]}), RoutingMode::DistributedMaster);
    let response = c.distribute().await?;

    assert_eq!(response.error, INTERNAL_ERROR_CODE);
    assert_eq!(response.data, Some(json!({"items": [{"id": "001"}], "totalItems": 1})));
    assert!(response.message.is_some());
    Ok(())
}

#[tokio::test]
async fn unreachable_worker_in_debug_mode_is_an_error() {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::broken());

    let mut c = call(&cluster.context, "get_agents", json!({"agent_id": ["001", "002"]}), RoutingMode::DistributedMaster)
        .with_debug(true);
    let err = c.distribute().await.unwrap_err();
    assert!(matches!(err, DapiError::Peer(_)));
    // The healthy node was still asked.
    assert_eq!(cluster.worker1.calls().len(), 1);
}

#[tokio::test]
async fn unknown_agents_are_answered_by_the_master() -> anyhow::Result<()> {
    init_tracing();
    let cluster = master_cluster(ClusterConfig::default(), RecordingPeer::answering(worker_reply("002")));

    let mut c = call(&cluster.context, "get_agents", json!({"agent_id": ["001", "999"]}), RoutingMode::DistributedMaster);
    let response = c.distribute().await?;

    assert_eq!(
        response.data,
        Some(json!({"items": [{"id": "999"}, {"id": "001"}], "totalItems": 2}))
    );
    assert!(cluster.worker2.calls().is_empty());
    Ok(())
}
