//! Replication Protocol
//!
//! Defines the wire protocol for pushing metadata snapshots between
//! servers.

use serde::{Deserialize, Serialize};

use crate::metadata::snapshot::{PartitionEntry, TransactionId};

/// Result of applying a pushed snapshot on the receiving peer
///
/// `Applied` and `AlreadyCurrent` both terminate the obligation; everything
/// else is a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// The peer stored the snapshot and now holds this transaction id
    Applied,
    /// The peer already holds this id, or a newer config version
    AlreadyCurrent,
    /// The peer refused the snapshot
    Rejected { reason: String },
}

/// Protocol messages for the metadata service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Push a snapshot to a peer
    PushSnapshot {
        namespace: String,
        table_id: String,
        transaction_id: TransactionId,
        config_version: u64,
        partition_map: Vec<PartitionEntry>,
    },

    /// Response to a snapshot push
    PushSnapshotResponse { outcome: PushOutcome },

    /// Status request
    StatusRequest,

    /// Status response
    StatusResponse {
        server_name: String,
        tables_held: u64,
    },

    /// Error response
    Error { message: String },
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::PushSnapshot { .. } => "PushSnapshot",
            Message::PushSnapshotResponse { .. } => "PushSnapshotResponse",
            Message::StatusRequest => "StatusRequest",
            Message::StatusResponse { .. } => "StatusResponse",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::snapshot::MetadataSnapshot;

    #[test]
    fn test_message_serialization() {
        let snapshot = MetadataSnapshot::compute(vec![PartitionEntry::stable(
            "",
            7,
            vec!["node-a".into(), "node-b".into()],
        )])
        .unwrap();

        let msg = Message::PushSnapshot {
            namespace: "prod".to_string(),
            table_id: "events".to_string(),
            transaction_id: *snapshot.transaction_id(),
            config_version: 3,
            partition_map: snapshot.partition_map().to_vec(),
        };

        let bytes = msg.serialize().unwrap();
        let restored = Message::deserialize(&bytes).unwrap();

        match restored {
            Message::PushSnapshot {
                namespace,
                table_id,
                transaction_id,
                config_version,
                partition_map,
            } => {
                assert_eq!(namespace, "prod");
                assert_eq!(table_id, "events");
                assert_eq!(&transaction_id, snapshot.transaction_id());
                assert_eq!(config_version, 3);
                assert_eq!(partition_map.len(), 1);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_frame_header() {
        let data = b"test message data";
        let header = FrameHeader::new(data);
        let bytes = header.to_bytes();
        let restored = FrameHeader::from_bytes(&bytes);

        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
    }
}
