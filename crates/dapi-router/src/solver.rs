//! Solver node resolution: which nodes hold the data a call needs.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use dapi_core::{Arguments, DomainError, SortOrder, SortSpec};

use crate::context::{AgentDirectory, AgentQuery};

/// Node name → agent ids that node answers for. An empty list means the
/// node's whole scope.
pub type SolverMap = BTreeMap<String, Vec<Value>>;

/// Directory key for an agent id given as a JSON string or number.
pub fn agent_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn by_node_descending() -> Option<SortSpec> {
    Some(SortSpec {
        fields: vec!["node_name".to_string()],
        order: SortOrder::Desc,
    })
}

/// Resolve the solver map for a call about to be forwarded by the master.
///
/// - `agent_id` list: ids grouped by owning node, each id once, in request
///   order; ids the directory does not know are answered by `local_node`.
/// - `agent_id` scalar: the single owning node.
/// - `node_id`: that node, whole scope. `node_id` is removed from
///   `arguments` since it is routing metadata.
/// - neither: every node the directory knows, whole scope.
pub fn resolve_solver_nodes(
    arguments: &mut Arguments,
    directory: &dyn AgentDirectory,
    local_node: &str,
) -> Result<SolverMap, DomainError> {
    if let Some(agent_id) = arguments.get("agent_id") {
        return match agent_id {
            Value::Array(ids) => group_by_node(ids, directory, local_node),
            id => {
                let node = directory.agent_node(&agent_key(id))?;
                Ok(SolverMap::from([(node, vec![id.clone()])]))
            }
        };
    }

    if let Some(node_id) = arguments.remove("node_id") {
        let node = match node_id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Ok(SolverMap::from([(node, Vec::new())]));
    }

    let agents = directory.agents_overview(&AgentQuery {
        ids: None,
        sort: by_node_descending(),
    })?;
    Ok(agents
        .into_iter()
        .map(|agent| (agent.node_name, Vec::new()))
        .collect())
}

fn group_by_node(
    ids: &[Value],
    directory: &dyn AgentDirectory,
    local_node: &str,
) -> Result<SolverMap, DomainError> {
    let keys: Vec<String> = ids.iter().map(agent_key).collect();
    let agents = directory.agents_overview(&AgentQuery {
        ids: Some(keys.clone()),
        sort: by_node_descending(),
    })?;
    let owners: HashMap<String, String> = agents
        .into_iter()
        .map(|agent| (agent.id, agent.node_name))
        .collect();

    let mut nodes = SolverMap::new();
    let mut seen = HashSet::new();
    for (id, key) in ids.iter().zip(&keys) {
        if !seen.insert(key.as_str()) {
            continue;
        }
        let node = match owners.get(key) {
            Some(node) => node.as_str(),
            None => {
                debug!(agent_id = %key, node = %local_node, "agent not in directory, answering locally");
                local_node
            }
        };
        nodes.entry(node.to_string()).or_default().push(id.clone());
    }
    Ok(nodes)
}
