//! Cluster configuration parser.
//!
//! Every section is optional in the file; missing sections fall back to
//! the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default page size applied to merged `data.items` when a request has no `limit`.
pub const DEFAULT_PAGE_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub distributed_api: DistributedApiConfig,
    pub intervals: IntervalsConfig,
    pub pagination: PaginationConfig,
    pub executor: ExecutorConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedApiConfig {
    pub enabled: bool,
}

impl Default for DistributedApiConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub communication: CommunicationIntervals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationIntervals {
    /// Deadline for a locally executed request, in seconds.
    pub timeout_api_request: f64,
}

impl Default for CommunicationIntervals {
    fn default() -> Self {
        Self {
            timeout_api_request: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_limit: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on blocking handlers running at the same time.
    pub max_blocking_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_blocking_workers: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// `[winner, loser]` message pairs. When both appear under the same key
    /// in a fan-out merge, the winner replaces the loser.
    pub priorities: Vec<(String, String)>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            priorities: vec![(
                "Some agents were not restarted".to_string(),
                "All selected agents were restarted".to_string(),
            )],
        }
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ClusterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let timeout = self.intervals.communication.timeout_api_request;
        if !timeout.is_finite() || timeout <= 0.0 {
            anyhow::bail!("intervals.communication.timeout_api_request must be a positive number of seconds, got {timeout}");
        }
        if self.executor.max_blocking_workers == 0 {
            anyhow::bail!("executor.max_blocking_workers must be at least 1");
        }
        Ok(())
    }

    /// Deadline for locally executed requests.
    pub fn api_request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.intervals.communication.timeout_api_request)
    }
}
