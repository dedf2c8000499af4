//! Peer Transport
//!
//! The seam between the replication orchestrator and the wire: one logical
//! remote call that pushes a snapshot to a named server. Production uses
//! [`TcpTransport`]; tests substitute scripted implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::NetworkClient;
use crate::directory::ConfigDirectory;
use crate::error::{Error, Result};
use crate::metadata::MetadataSnapshot;
use crate::replication::{Message, PushOutcome};

/// Transport contract for pushing snapshots to peers
///
/// Implementations return `Ok` with the peer's verdict when the exchange
/// completed, and `Err` for transport-level failures (unreachable, timeout,
/// protocol violation). The caller treats everything except `Applied` and
/// `AlreadyCurrent` as retryable.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Push a snapshot to the named server
    async fn push_snapshot(
        &self,
        server: &str,
        namespace: &str,
        table_id: &str,
        config_version: u64,
        snapshot: &MetadataSnapshot,
    ) -> Result<PushOutcome>;
}

/// TCP transport resolving server names through the config directory
pub struct TcpTransport {
    directory: Arc<ConfigDirectory>,
    client: NetworkClient,
}

impl TcpTransport {
    /// Create a transport over the given directory
    pub fn new(
        directory: Arc<ConfigDirectory>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            client: NetworkClient::new(connect_timeout, request_timeout),
        }
    }

    /// Close pooled connections
    pub async fn close(&self) {
        self.client.close_all().await;
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn push_snapshot(
        &self,
        server: &str,
        namespace: &str,
        table_id: &str,
        config_version: u64,
        snapshot: &MetadataSnapshot,
    ) -> Result<PushOutcome> {
        let address = self.directory.server_address(server).await?;

        let request = Message::PushSnapshot {
            namespace: namespace.to_string(),
            table_id: table_id.to_string(),
            transaction_id: *snapshot.transaction_id(),
            config_version,
            partition_map: snapshot.partition_map().to_vec(),
        };

        match self.client.request(&address, request).await? {
            Message::PushSnapshotResponse { outcome } => Ok(outcome),
            Message::Error { message } => Err(Error::Replication(message)),
            other => Err(Error::Network(format!(
                "unexpected response to PushSnapshot: {}",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataStore, PartitionEntry};
    use crate::network::MetadataService;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_push_end_to_end() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::new(dir.path().to_path_buf(), "node-b".into()).unwrap());
        let service = Arc::new(MetadataService::new(Arc::clone(&store)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(Arc::clone(&service).serve(listener));

        let directory = Arc::new(ConfigDirectory::new());
        directory.add_server("node-b".into(), address).await;

        let transport = TcpTransport::new(
            Arc::clone(&directory),
            Duration::from_secs(1),
            Duration::from_secs(2),
        );

        let snapshot = MetadataSnapshot::compute(vec![PartitionEntry::stable(
            "",
            1,
            vec!["node-b".into()],
        )])
        .unwrap();

        let outcome = transport
            .push_snapshot("node-b", "prod", "events", 1, &snapshot)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Applied);

        // Second push of the same snapshot is an idempotent success
        let outcome = transport
            .push_snapshot("node-b", "prod", "events", 1, &snapshot)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::AlreadyCurrent);

        assert!(store
            .has_snapshot("prod", "events", snapshot.transaction_id())
            .await
            .unwrap());

        service.stop();
    }

    #[tokio::test]
    async fn test_unknown_server_fails() {
        let directory = Arc::new(ConfigDirectory::new());
        let transport = TcpTransport::new(
            directory,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );

        let snapshot =
            MetadataSnapshot::compute(vec![PartitionEntry::stable("", 1, vec!["x".into()])])
                .unwrap();

        let result = transport
            .push_snapshot("ghost", "prod", "events", 1, &snapshot)
            .await;
        assert!(matches!(result, Err(Error::ServerNotFound(_))));
    }
}
