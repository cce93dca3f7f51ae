//! Node and engine configuration.
//!
//! Every section has defaults; a JSON document only needs to name what it overrides.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for task execution on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Number of workers running tasks
    pub worker_count: usize,
    /// Maximum number of submitted tasks waiting for a worker
    pub queue_capacity: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Run every aggregation in a single task instead of splitting it across nodes
    pub force_single_node: bool,
    /// Upper bound on rule firings per iterative pass
    pub max_rule_applications: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            force_single_node: false,
            max_rule_applications: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long a query may run before the coordinator gives up on it
    #[serde(with = "duration_ms")]
    pub query_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub task_manager: TaskManagerConfig,
    pub optimizer: OptimizerConfig,
    pub coordinator: CoordinatorConfig,
    /// Address of the Prometheus endpoint, if metrics are exported
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            task_manager: TaskManagerConfig::default(),
            optimizer: OptimizerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            metrics_addr: None,
        }
    }
}

impl NodeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NodeConfig::from_json_str(
            r#"{"node_id": "node-7", "coordinator": {"query_timeout": 1500}, "optimizer": {"force_single_node": true}}"#,
        )
        .unwrap();
        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.coordinator.query_timeout, Duration::from_millis(1500));
        assert!(config.optimizer.force_single_node);
        assert_eq!(config.optimizer.max_rule_applications, 10_000);
        assert_eq!(config.task_manager, TaskManagerConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"task_manager": {{"worker_count": 2, "queue_capacity": 8}}}}"#).unwrap();
        let config = NodeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.task_manager.worker_count, 2);
        assert_eq!(config.task_manager.queue_capacity, 8);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(NodeConfig::from_json_str("{"), Err(ConfigError::Json(_))));
    }
}
