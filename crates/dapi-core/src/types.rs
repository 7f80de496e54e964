//! Shared types used across dapi crates.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// Keyword arguments of a distributed call, by parameter name.
pub type Arguments = serde_json::Map<String, Value>;

/// Where a call is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Always runs on the node that received it.
    LocalAny,
    /// Runs on the master; workers hand it to the master unchanged.
    LocalMaster,
    /// The master fans it out to the nodes owning the data; workers hand it to the master.
    DistributedMaster,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::LocalAny => "local_any",
            RoutingMode::LocalMaster => "local_master",
            RoutingMode::DistributedMaster => "distributed_master",
        }
    }
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Master,
    Worker,
}

/// Identity of the node running this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(rename = "node")]
    pub name: String,
}

impl NodeInfo {
    pub fn master(name: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::Master,
            name: name.into(),
        }
    }

    pub fn worker(name: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::Worker,
            name: name.into(),
        }
    }

    pub fn is_master(&self) -> bool {
        self.node_type == NodeType::Master
    }
}

// ── Response envelope ──────────────────────────────────────────────

/// The normalized `{data|message, error}` response shape.
///
/// `error == 0` means success and the payload sits under `data`; any other
/// code puts it under `message`. A merged fan-out response can carry both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapiResponse {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub data: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub message: Option<Value>,
    #[serde(default)]
    pub error: i64,
}

/// Keeps an explicit `null` distinct from an absent key.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl DapiResponse {
    pub fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            message: None,
            error: 0,
        }
    }

    pub fn failure(code: i64, message: impl Into<Value>) -> Self {
        Self {
            data: None,
            message: Some(message.into()),
            error: code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error == 0
    }

    pub fn into_value(self) -> Value {
        // A struct of JSON values and an integer always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<&DomainError> for DapiResponse {
    fn from(err: &DomainError) -> Self {
        DapiResponse::failure(err.code, err.message.clone())
    }
}

// ── Sorting ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A declared sort: compare by each field in turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub fields: Vec<String>,
    #[serde(default)]
    pub order: SortOrder,
}
