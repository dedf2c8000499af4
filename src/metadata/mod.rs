//! Metadata Module
//!
//! Partition-map snapshots and the local store that persists them.

pub mod snapshot;
pub mod store;

pub use snapshot::{MetadataSnapshot, PartitionEntry, TransactionId};
pub use store::{ApplyResult, MetadataStore};
