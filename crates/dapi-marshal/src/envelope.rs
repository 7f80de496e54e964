//! Call envelope: the JSON shape a distributed call travels in.

use serde::{Deserialize, Serialize};

use dapi_core::{Arguments, RoutingMode};

use crate::error::{MarshalError, MarshalResult};
use crate::function::{Function, FunctionRef};
use crate::registry::FunctionRegistry;

/// Serialized form of a distributed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub function: FunctionRef,
    pub arguments: Arguments,
    pub request_type: RoutingMode,
    #[serde(default)]
    pub wait_for_complete: bool,
    #[serde(default)]
    pub from_cluster: bool,
    #[serde(default)]
    pub is_async: bool,
}

/// A call envelope whose function reference has been resolved.
#[derive(Debug, Clone)]
pub struct DecodedCall {
    pub function: Function,
    pub arguments: Arguments,
    pub request_type: RoutingMode,
    pub wait_for_complete: bool,
    pub from_cluster: bool,
    pub is_async: bool,
}

impl CallEnvelope {
    pub fn to_vec(&self) -> MarshalResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MarshalError::Encode(e.to_string()))
    }

    pub fn to_json_string(&self) -> MarshalResult<String> {
        serde_json::to_string(self).map_err(|e| MarshalError::Encode(e.to_string()))
    }

    pub fn from_slice(bytes: &[u8]) -> MarshalResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| MarshalError::Malformed(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> MarshalResult<Self> {
        Self::from_slice(s.as_bytes())
    }

    /// Resolve the function reference against `registry`.
    pub fn resolve(self, registry: &FunctionRegistry) -> MarshalResult<DecodedCall> {
        let function = registry.resolve(&self.function)?;
        Ok(DecodedCall {
            function,
            arguments: self.arguments,
            request_type: self.request_type,
            wait_for_complete: self.wait_for_complete,
            from_cluster: self.from_cluster,
            is_async: self.is_async,
        })
    }
}

impl DecodedCall {
    /// Parse and resolve a call envelope in one step.
    pub fn decode(bytes: &[u8], registry: &FunctionRegistry) -> MarshalResult<Self> {
        CallEnvelope::from_slice(bytes)?.resolve(registry)
    }
}
