//! Error types for the sector index.

use thiserror::Error;

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("storage not attached: {0}")]
    StorageNotFound(String),
}
