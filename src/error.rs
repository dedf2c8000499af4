//! ShardSync Error Types

use thiserror::Error;

/// Result type alias for ShardSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// ShardSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Malformed table definition for {table}: {reason}")]
    TableDefinition { table: String, reason: String },

    // Metadata errors
    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Metadata serialization error: {0}")]
    MetadataSerialization(#[from] bincode::Error),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Push rejected by {server}: {reason}")]
    PushRejected { server: String, reason: String },

    #[error("Server not found in directory: {0}")]
    ServerNotFound(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Rejections count as retryable on purpose: the retry contract treats
    /// every failed push the same and the remote peer is the final authority
    /// on whether a snapshot is needed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::Io(_)
                | Error::PushRejected { .. }
        )
    }
}
