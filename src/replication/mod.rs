//! Replication Module
//!
//! Propagates partition-map metadata snapshots to every server named by
//! the current table configuration.

pub mod protocol;
mod orchestrator;

pub use orchestrator::{MetadataReplication, ReplicationJob};
pub use protocol::{FrameHeader, Message, PushOutcome};

use std::time::Duration;

/// Configuration for metadata replication
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Number of worker tasks draining the retry queue
    pub num_workers: usize,
    /// Delay before a failed push is retried
    pub retry_delay: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            retry_delay: Duration::from_secs(30),
        }
    }
}
