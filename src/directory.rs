//! Cluster Configuration Directory
//!
//! In-process view of cluster configuration: the server address book and
//! the current table definitions. The authoritative partition map for each
//! table is produced upstream and delivered here as a config-changed event;
//! the directory fans those events out to subscribers over a broadcast
//! channel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::error::{Error, Result};
use crate::metadata::MetadataSnapshot;

/// Capacity of the config-changed broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration of a single server in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name
    pub name: String,
    /// Address for the metadata service (host:port)
    pub address: String,
}

/// Current definition of one table
///
/// `version` is the monotonic config sequence assigned by the upstream
/// authority; it orders snapshots whose content hashes are otherwise
/// incomparable.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    /// Namespace the table belongs to
    pub namespace: String,
    /// Table identifier within the namespace
    pub table_id: String,
    /// Monotonic table-config version
    pub version: u64,
    /// Current partition-map snapshot
    pub snapshot: Arc<MetadataSnapshot>,
}

impl TableDefinition {
    /// Fully qualified table name, for logging
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.table_id)
    }
}

/// In-process cluster configuration directory
pub struct ConfigDirectory {
    /// Known servers: name -> config
    servers: RwLock<HashMap<String, ServerConfig>>,
    /// Current table definitions: (namespace, table_id) -> definition
    tables: RwLock<HashMap<(String, String), TableDefinition>>,
    /// Config-changed event fanout
    events: broadcast::Sender<TableDefinition>,
}

impl ConfigDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            servers: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register or update a server
    pub async fn add_server(&self, name: String, address: String) {
        let mut servers = self.servers.write().await;
        servers.insert(name.clone(), ServerConfig { name, address });
    }

    /// Look up a server's address by name
    pub async fn server_address(&self, name: &str) -> Result<String> {
        let servers = self.servers.read().await;
        servers
            .get(name)
            .map(|s| s.address.clone())
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))
    }

    /// List all known servers
    pub async fn list_servers(&self) -> Vec<ServerConfig> {
        self.servers.read().await.values().cloned().collect()
    }

    /// Publish a new table definition
    ///
    /// Rejects regressions: an update whose version is not newer than the
    /// stored definition is dropped, since config versions are monotonic by
    /// contract. Subscribers are notified of every accepted update.
    pub async fn update_table_config(&self, definition: TableDefinition) -> Result<()> {
        let key = (definition.namespace.clone(), definition.table_id.clone());

        {
            let mut tables = self.tables.write().await;
            if let Some(existing) = tables.get(&key) {
                if existing.version >= definition.version {
                    return Err(Error::TableDefinition {
                        table: definition.qualified_name(),
                        reason: format!(
                            "version {} is not newer than current {}",
                            definition.version, existing.version
                        ),
                    });
                }
            }
            tables.insert(key, definition.clone());
        }

        // Nobody listening is fine; subscribers come and go
        let _ = self.events.send(definition);
        Ok(())
    }

    /// Get the current definition of a table
    pub async fn get_table_config(
        &self,
        namespace: &str,
        table_id: &str,
    ) -> Option<TableDefinition> {
        let tables = self.tables.read().await;
        tables
            .get(&(namespace.to_string(), table_id.to_string()))
            .cloned()
    }

    /// List all current table definitions
    pub async fn list_tables(&self) -> Vec<TableDefinition> {
        self.tables.read().await.values().cloned().collect()
    }

    /// Subscribe to table-config-changed events
    pub fn subscribe(&self) -> broadcast::Receiver<TableDefinition> {
        self.events.subscribe()
    }
}

impl Default for ConfigDirectory {
    fn default() -> Self {
        Self::new()
    }
}
