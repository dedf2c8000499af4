//! ShardSync Configuration
//!
//! This module provides configuration structures for the ShardSync
//! metadata replication service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main ShardSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSyncConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique server name within the cluster
    pub name: String,

    /// Address to bind for the metadata service
    pub bind_address: String,

    /// Data directory for the local metadata store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Advertised address for other nodes to connect
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterConfig {
    /// Known servers in the cluster
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

/// One server in the cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique server name
    pub name: String,
    /// Metadata service address (host:port)
    pub address: String,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Number of replication worker tasks
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Delay before a failed push is retried, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_num_workers() -> usize {
    4
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/shardsync")
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            retry_delay_secs: default_retry_delay_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ShardSyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ShardSyncConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ShardSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.replication.num_workers == 0 {
            return Err(crate::Error::Config(
                "replication.num_workers must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get the metadata store directory path
    pub fn store_dir(&self) -> PathBuf {
        self.node.data_dir.join("metadata")
    }

    /// Get the retry delay as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.replication.retry_delay_secs)
    }

    /// Get the connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.replication.connect_timeout_ms)
    }

    /// Get the request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.replication.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
name = "node-1"
bind_address = "0.0.0.0:7654"
data_dir = "/var/lib/shardsync"

[replication]
num_workers = 8
retry_delay_secs = 15
"#;

        let config = ShardSyncConfig::from_str(toml).unwrap();
        assert_eq!(config.node.name, "node-1");
        assert_eq!(config.replication.num_workers, 8);
        assert_eq!(config.retry_delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_cluster_servers() {
        let toml = r#"
[node]
name = "node-1"
bind_address = "0.0.0.0:7654"

[[cluster.servers]]
name = "node-2"
address = "10.0.0.2:7654"

[[cluster.servers]]
name = "node-3"
address = "10.0.0.3:7654"
"#;

        let config = ShardSyncConfig::from_str(toml).unwrap();
        assert_eq!(config.cluster.servers.len(), 2);
        assert_eq!(config.cluster.servers[0].name, "node-2");
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
[node]
name = "node-1"
bind_address = "0.0.0.0:7654"
"#;

        let config = ShardSyncConfig::from_str(toml).unwrap();
        assert_eq!(config.replication.num_workers, 4);
        assert_eq!(config.retry_delay(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.advertise_address(), "0.0.0.0:7654");
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let toml = r#"
[node]
name = "node-1"
bind_address = "0.0.0.0:7654"

[replication]
num_workers = 0
"#;

        assert!(ShardSyncConfig::from_str(toml).is_err());
    }
}
