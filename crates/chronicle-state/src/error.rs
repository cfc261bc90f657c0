//! Error types for chronicle-state

use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying file I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A log frame could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A complete (newline-terminated) log line failed to parse
    #[error("corrupt log entry at line {line}: {reason}")]
    CorruptEntry { line: usize, reason: String },

    /// A write frame reused an id already present in the log
    #[error("record id already written: {id}")]
    DuplicateId { id: String },

    /// Payload contained a number that has no canonical form
    #[error("payload is not canonicalizable: {0}")]
    NonCanonicalPayload(String),

    /// Record not present in the log
    #[error("record not found: {id}")]
    NotFound { id: String },
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
