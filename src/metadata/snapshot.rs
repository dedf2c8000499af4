//! Metadata Snapshot
//!
//! Immutable, content-addressed description of a table's partition layout.
//! A snapshot is identified by a transaction id computed as a SHA-1 hash
//! over its partition map; two snapshots with equal ids are guaranteed
//! interchangeable. A changed layout is always a new snapshot with a new
//! id, never a mutation of an existing one.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Content hash identifying one partition-map state
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId([u8; 20]);

impl TransactionId {
    /// Size of the hash in bytes
    pub const SIZE: usize = 20;

    /// Wrap raw hash bytes
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    /// Compute the transaction id for a partition map
    ///
    /// The hash covers the canonical binary encoding of the entries, so any
    /// change to ranges or placements yields a different id.
    pub fn compute(partition_map: &[PartitionEntry]) -> Result<Self> {
        let encoded = bincode::serialize(partition_map)?;
        let digest = Sha1::digest(&encoded);
        Ok(Self(digest.into()))
    }

    /// Get the raw hash bytes
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    /// Parse a transaction id from its hex representation
    ///
    /// Decodes byte-wise, so non-ASCII input is rejected rather than
    /// tripping over a char boundary.
    pub fn parse(hex: &str) -> Result<Self> {
        let raw = hex.as_bytes();
        if raw.len() != Self::SIZE * 2 {
            return Err(Error::Metadata(format!("invalid transaction id: {}", hex)));
        }

        let mut bytes = [0u8; Self::SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hi = char::from(raw[i * 2]).to_digit(16);
            let lo = char::from(raw[i * 2 + 1]).to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => *byte = (hi as u8) << 4 | lo as u8,
                _ => {
                    return Err(Error::Metadata(format!("invalid transaction id: {}", hex)));
                }
            }
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self)
    }
}

/// One contiguous key-range segment of a table's partition map
///
/// `begin` is the inclusive lower bound of the range; the range extends to
/// the next entry's `begin` (or the end of the keyspace for the last entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Inclusive lower bound key of this partition's range
    pub begin: String,

    /// Opaque id distinguishing physical placements of this partition;
    /// changes when the partition is physically recreated (e.g. after a split)
    pub placement_id: u64,

    /// Current stable replica set
    pub servers: Vec<String>,

    /// Servers acquiring a copy, not yet authoritative
    pub servers_joining: Vec<String>,

    /// Whether this partition is undergoing a range split
    pub splitting: bool,

    /// Key at which the partition will divide (meaningful only when splitting)
    pub split_point: String,

    /// Replica set for the low child range after the split
    pub split_servers_low: Vec<String>,

    /// Replica set for the high child range after the split
    pub split_servers_high: Vec<String>,
}

impl PartitionEntry {
    /// Create a stable (non-splitting) entry
    pub fn stable(begin: impl Into<String>, placement_id: u64, servers: Vec<String>) -> Self {
        Self {
            begin: begin.into(),
            placement_id,
            servers,
            servers_joining: Vec::new(),
            splitting: false,
            split_point: String::new(),
            split_servers_low: Vec::new(),
            split_servers_high: Vec::new(),
        }
    }

    /// All servers referenced by this entry, across every placement list
    pub fn all_servers(&self) -> impl Iterator<Item = &str> {
        self.servers
            .iter()
            .chain(self.servers_joining.iter())
            .chain(self.split_servers_low.iter())
            .chain(self.split_servers_high.iter())
            .map(String::as_str)
    }
}

/// Immutable partition-map snapshot for one table
///
/// Construction performs no range validation; producing a well-formed map
/// is the responsibility of the upstream authority. Use
/// [`MetadataSnapshot::validate_ranges`] to check coverage explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    transaction_id: TransactionId,
    partition_map: Vec<PartitionEntry>,
}

impl MetadataSnapshot {
    /// Construct from an already-known transaction id and partition map
    pub fn new(transaction_id: TransactionId, partition_map: Vec<PartitionEntry>) -> Self {
        Self {
            transaction_id,
            partition_map,
        }
    }

    /// Construct a snapshot, deriving the transaction id from the entries
    pub fn compute(partition_map: Vec<PartitionEntry>) -> Result<Self> {
        let transaction_id = TransactionId::compute(&partition_map)?;
        Ok(Self {
            transaction_id,
            partition_map,
        })
    }

    /// Get the transaction id
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Get the partition map
    pub fn partition_map(&self) -> &[PartitionEntry] {
        &self.partition_map
    }

    /// All servers referenced anywhere in the map, deduplicated and sorted
    pub fn target_servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = self
            .partition_map
            .iter()
            .flat_map(|entry| entry.all_servers())
            .map(str::to_string)
            .collect();
        servers.sort_unstable();
        servers.dedup();
        servers
    }

    /// Check that the entries partition the keyspace: sorted by `begin`,
    /// starting at the open lower bound, with no duplicate range starts
    pub fn validate_ranges(&self) -> Result<()> {
        let map = &self.partition_map;

        let first = map
            .first()
            .ok_or_else(|| Error::Metadata("partition map is empty".into()))?;

        if !first.begin.is_empty() {
            return Err(Error::Metadata(format!(
                "first partition must begin at the start of the keyspace, found {:?}",
                first.begin
            )));
        }

        for pair in map.windows(2) {
            if pair[1].begin <= pair[0].begin {
                return Err(Error::Metadata(format!(
                    "partition ranges overlap or are unordered at {:?}",
                    pair[1].begin
                )));
            }
        }

        for (i, entry) in map.iter().enumerate() {
            if entry.splitting {
                if entry.split_point <= entry.begin {
                    return Err(Error::Metadata(format!(
                        "split point {:?} precedes range start {:?}",
                        entry.split_point, entry.begin
                    )));
                }
                if let Some(next) = map.get(i + 1) {
                    if entry.split_point >= next.begin {
                        return Err(Error::Metadata(format!(
                            "split point {:?} outside partition range",
                            entry.split_point
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

// Equality is defined by transaction id: contents are guaranteed identical
// whenever ids match.
impl PartialEq for MetadataSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id
    }
}

impl Eq for MetadataSnapshot {}
