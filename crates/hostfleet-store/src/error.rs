//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested host or allocation record was not found.
    #[error("record not found")]
    NotFound,

    /// A unique index (address or hostname) already points at another host.
    #[error("unique index conflict: {index} {value} is taken")]
    Conflict {
        /// Name of the index that rejected the write.
        index: &'static str,
        /// The conflicting value.
        value: String,
    },

    /// `RocksDB` reported an error.
    #[error("database error: {0}")]
    Database(String),

    /// CBOR encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}
