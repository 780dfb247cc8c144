//! Error types for the hybrid index.

use thiserror::Error;

/// Errors surfaced by the lexical and semantic indexes.
#[derive(Error, Debug)]
pub enum IndexError {
    /// RocksDB storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Filesystem failure (table file, lockfile, backups)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary (de)serialization failure for column-family values
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Could not acquire the cross-process write lock within the deadline
    #[error("Lock acquisition timed out after {0}ms")]
    LockTimeout(u64),

    /// On-disk state failed validation beyond repair
    #[error("Corrupt index: {0}")]
    Corrupt(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
