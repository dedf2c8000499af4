//! Metadata Service
//!
//! Peer-side TCP server: accepts snapshot pushes from other servers and
//! applies them to the local metadata store. The service is the final
//! authority on whether a push is needed: a snapshot whose config version
//! is not newer than the stored head is answered `AlreadyCurrent` and
//! otherwise ignored, which is what makes racing pushes for the same table
//! converge on the newest version.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::metadata::{ApplyResult, MetadataSnapshot, MetadataStore, TransactionId};
use crate::replication::{Message, PushOutcome};

/// Peer-side metadata service
pub struct MetadataService {
    /// Local metadata store
    store: Arc<MetadataStore>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MetadataService {
    /// Create a new service over the local store
    pub fn new(store: Arc<MetadataStore>) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Self {
            store,
            shutdown: shutdown_tx,
        }
    }

    /// Serve connections on an already-bound listener until stopped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(
            "Metadata service listening on {}",
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        // stop() may already have been signalled before serve first ran
        if *shutdown_rx.borrow_and_update() {
            tracing::info!("Metadata service stopped");
            return Ok(());
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let service = Arc::clone(&self);
                            let peer_addr = addr.to_string();

                            tokio::spawn(async move {
                                if let Err(e) = service.handle_connection(socket).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Metadata service stopped");
        Ok(())
    }

    /// Stop the service
    pub fn stop(&self) {
        // send_replace stores the value even with no receiver subscribed
        self.shutdown.send_replace(true);
    }

    /// Handle one connection: request-response until the peer hangs up
    async fn handle_connection(&self, socket: TcpStream) -> Result<()> {
        let (mut reader, mut writer) = socket.into_split();

        loop {
            match read_message(&mut reader).await {
                Ok(message) => {
                    tracing::trace!("Received {}", message.type_name());
                    let response = self.handle_message(message).await;
                    write_message(&mut writer, &response).await?;
                }
                Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Connection closed
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error reading message: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Dispatch a single request to a response
    pub async fn handle_message(&self, message: Message) -> Message {
        match message {
            Message::PushSnapshot {
                namespace,
                table_id,
                transaction_id,
                config_version,
                partition_map,
            } => {
                let outcome = self
                    .apply_push(
                        &namespace,
                        &table_id,
                        transaction_id,
                        config_version,
                        partition_map,
                    )
                    .await;
                Message::PushSnapshotResponse { outcome }
            }
            Message::StatusRequest => {
                let tables_held = self.store.tables_held().await.unwrap_or(0);
                Message::StatusResponse {
                    server_name: self.store.server_name().to_string(),
                    tables_held,
                }
            }
            other => Message::Error {
                message: format!("unexpected request: {}", other.type_name()),
            },
        }
    }

    /// Apply one pushed snapshot against the local store
    async fn apply_push(
        &self,
        namespace: &str,
        table_id: &str,
        transaction_id: TransactionId,
        config_version: u64,
        partition_map: Vec<crate::metadata::PartitionEntry>,
    ) -> PushOutcome {
        // The transaction id is a content hash; a mismatch means the payload
        // was corrupted or the sender lied about the id
        let computed = match TransactionId::compute(&partition_map) {
            Ok(id) => id,
            Err(e) => {
                return PushOutcome::Rejected {
                    reason: format!("unhashable partition map: {}", e),
                }
            }
        };

        if computed != transaction_id {
            tracing::warn!(
                "Rejecting push for {}/{}: transaction id {} does not match content",
                namespace,
                table_id,
                transaction_id
            );
            return PushOutcome::Rejected {
                reason: "transaction id does not match partition map content".to_string(),
            };
        }

        let snapshot = MetadataSnapshot::new(transaction_id, partition_map);

        match self
            .store
            .apply_snapshot(namespace, table_id, config_version, &snapshot)
            .await
        {
            Ok(ApplyResult::Applied) => {
                tracing::info!(
                    "Applied snapshot {} (version {}) for {}/{}",
                    transaction_id,
                    config_version,
                    namespace,
                    table_id
                );
                PushOutcome::Applied
            }
            Ok(ApplyResult::AlreadyCurrent) => PushOutcome::AlreadyCurrent,
            Err(e) => {
                tracing::error!(
                    "Failed to store snapshot {} for {}/{}: {}",
                    transaction_id,
                    namespace,
                    table_id,
                    e
                );
                PushOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PartitionEntry;
    use tempfile::tempdir;

    fn service(dir: &std::path::Path) -> MetadataService {
        let store = Arc::new(MetadataStore::new(dir.to_path_buf(), "node-b".into()).unwrap());
        MetadataService::new(store)
    }

    fn push_message(version: u64, servers: Vec<String>) -> (Message, TransactionId) {
        let snapshot =
            MetadataSnapshot::compute(vec![PartitionEntry::stable("", 1, servers)]).unwrap();
        let txid = *snapshot.transaction_id();
        let msg = Message::PushSnapshot {
            namespace: "prod".into(),
            table_id: "events".into(),
            transaction_id: txid,
            config_version: version,
            partition_map: snapshot.partition_map().to_vec(),
        };
        (msg, txid)
    }

    #[tokio::test]
    async fn test_push_applies_then_noops() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        let (msg, _) = push_message(1, vec!["a".into()]);

        match service.handle_message(msg.clone()).await {
            Message::PushSnapshotResponse { outcome } => {
                assert_eq!(outcome, PushOutcome::Applied)
            }
            other => panic!("unexpected response: {:?}", other),
        }

        // Idempotent replay
        match service.handle_message(msg).await {
            Message::PushSnapshotResponse { outcome } => {
                assert_eq!(outcome, PushOutcome::AlreadyCurrent)
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_version_noops() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        let (t2, t2_id) = push_message(2, vec!["a".into(), "b".into()]);
        let (t1, _) = push_message(1, vec!["a".into()]);

        // Newer version lands first; the stale push must not displace it
        service.handle_message(t2).await;
        match service.handle_message(t1).await {
            Message::PushSnapshotResponse { outcome } => {
                assert_eq!(outcome, PushOutcome::AlreadyCurrent)
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let (head, version) = service.store.head("prod", "events").await.unwrap().unwrap();
        assert_eq!(head, t2_id);
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_content_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        let other_map = vec![PartitionEntry::stable("", 9, vec!["z".into()])];
        let wrong_id = TransactionId::from_bytes([7u8; 20]);

        let msg = Message::PushSnapshot {
            namespace: "prod".into(),
            table_id: "events".into(),
            transaction_id: wrong_id,
            config_version: 1,
            partition_map: other_map,
        };

        match service.handle_message(msg).await {
            Message::PushSnapshotResponse { outcome } => {
                assert!(matches!(outcome, PushOutcome::Rejected { .. }))
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_before_serve_terminates() {
        let dir = tempdir().unwrap();
        let service = Arc::new(service(dir.path()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

        // Signalled before serve ever polls; serve must still return
        service.stop();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            Arc::clone(&service).serve(listener),
        )
        .await
        .expect("serve must observe a stop sent before it ran")
        .unwrap();
    }

    #[tokio::test]
    async fn test_status_request() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        let (msg, _) = push_message(1, vec!["a".into()]);
        service.handle_message(msg).await;

        match service.handle_message(Message::StatusRequest).await {
            Message::StatusResponse {
                server_name,
                tables_held,
            } => {
                assert_eq!(server_name, "node-b");
                assert_eq!(tables_held, 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
