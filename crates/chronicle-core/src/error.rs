//! Error taxonomy for the memory store.

use chronicle_state::{Category, RecordId, StorageError};

use crate::index::IndexError;

/// Malformed input. Never retried; surfaced to the caller verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("importance must be within [0, 1], got {0}")]
    ImportanceOutOfRange(f64),

    #[error("payload cannot be hashed: {0}")]
    Payload(String),

    #[error("invalid decay parameters: {0}")]
    InvalidDecayParams(String),

    #[error("top_k must be positive")]
    ZeroTopK,

    #[error("time window must not be negative")]
    NegativeTimeWindow,

    #[error("query vector must not be empty")]
    EmptyVector,

    #[error("versioned write names {requested} but the current version is {owner}")]
    ConflictingSupersedes { requested: RecordId, owner: RecordId },
}

/// Errors produced by memory store operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("duplicate record in {category}: existing id {id}")]
    Duplicate { id: RecordId, category: Category },

    #[error("record not found: {id}")]
    NotFound { id: RecordId },

    #[error("capacity exceeded: {current} records held, soft limit {limit}")]
    CapacityExceeded { limit: usize, current: usize },

    #[error("similarity index out of sync: {} unknown ids", unknown_ids.len())]
    StaleIndex { unknown_ids: Vec<RecordId> },

    #[error("similarity index error: {0}")]
    Index(#[from] IndexError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = MemoryError::from(ValidationError::ImportanceOutOfRange(1.5));
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_stale_index_counts_ids() {
        let err = MemoryError::StaleIndex {
            unknown_ids: vec![RecordId::from("a"), RecordId::from("b")],
        };
        assert!(err.to_string().contains("2 unknown ids"));
    }
}
