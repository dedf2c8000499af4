//! ShardSync - Distributed Partition-Map Metadata Replication
//!
//! ShardSync keeps every storage server in a cluster supplied with the
//! authoritative partition-map snapshot for each table it holds (or is
//! about to hold). Snapshots are immutable and content-addressed: a
//! transaction id is a hash over the partition map, so any successfully
//! delivered id is a valid terminal state and redelivery is always safe.
//!
//! # Architecture
//!
//! The config directory publishes table-configuration-changed events. The
//! replication orchestrator turns each event into one obligation per
//! target server, and a fixed pool of workers drains a shared delay-aware
//! retry queue, pushing snapshots over TCP and re-scheduling failures on a
//! fixed interval until every target converges.
//!
//! # Features
//!
//! - Content-addressed, immutable metadata snapshots (SHA-1 transaction ids)
//! - Partition splits and replica-set transitions without consistency loss
//! - Delay-aware retry queue with indefinite fixed-interval retries
//! - Version-guarded peer apply, so racing pushes converge on the newest map
//! - SQLite-backed local metadata store
//! - Clean worker-pool lifecycle: stop waits for in-flight pushes

pub mod config;
pub mod directory;
pub mod error;
pub mod metadata;
pub mod network;
pub mod queue;
pub mod replication;

pub use config::ShardSyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ShardSyncConfig;
    pub use crate::directory::{ConfigDirectory, ServerConfig, TableDefinition};
    pub use crate::error::{Error, Result};
    pub use crate::metadata::{MetadataSnapshot, MetadataStore, PartitionEntry, TransactionId};
    pub use crate::network::{MetadataService, PeerTransport, TcpTransport};
    pub use crate::queue::DelayedQueue;
    pub use crate::replication::{MetadataReplication, ReplicationConfig};
}
