//! Record validation: the gate every candidate passes before ingest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronicle_state::{Category, ContentHash, EmbeddingRef, MemoryRecord, RecordId};

use crate::config::RetentionTable;
use crate::error::ValidationError;

/// Importance assigned when the caller leaves it unset.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// An unvalidated artifact as submitted through the write API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub importance: Option<f64>,
    #[serde(default)]
    pub source: String,
    pub payload: Option<serde_json::Value>,
    pub embedding_ref: Option<String>,
    /// Earlier record this candidate replaces
    #[serde(default)]
    pub supersedes: Option<RecordId>,
}

impl CandidateRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        category: impl Into<String>,
        payload: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp: Some(timestamp),
            category: Some(category.into()),
            payload: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_embedding_ref(mut self, embedding_ref: impl Into<String>) -> Self {
        self.embedding_ref = Some(embedding_ref.into());
        self
    }

    pub fn superseding(mut self, id: RecordId) -> Self {
        self.supersedes = Some(id);
        self
    }
}

fn is_blank(payload: &serde_json::Value) -> bool {
    match payload {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Check a candidate against the record invariants and stamp derived fields.
///
/// Out-of-range importance is rejected, never clamped.
pub fn validate(
    candidate: CandidateRecord,
    retention: &RetentionTable,
) -> Result<MemoryRecord, ValidationError> {
    let payload = candidate
        .payload
        .filter(|p| !is_blank(p))
        .ok_or(ValidationError::MissingField { field: "payload" })?;
    let timestamp = candidate
        .timestamp
        .ok_or(ValidationError::MissingField { field: "timestamp" })?;
    let category: Category = candidate
        .category
        .ok_or(ValidationError::MissingField { field: "category" })?
        .parse()
        .map_err(|e: chronicle_state::UnknownCategory| ValidationError::UnknownCategory(e.0))?;

    let importance = candidate.importance.unwrap_or(DEFAULT_IMPORTANCE);
    if !(0.0..=1.0).contains(&importance) {
        return Err(ValidationError::ImportanceOutOfRange(importance));
    }

    let embedding_ref = candidate
        .embedding_ref
        .filter(|r| !r.trim().is_empty())
        .map(EmbeddingRef)
        .ok_or(ValidationError::MissingField {
            field: "embedding_ref",
        })?;

    let content_hash =
        ContentHash::of_payload(&payload).map_err(|e| ValidationError::Payload(e.to_string()))?;

    Ok(MemoryRecord {
        id: RecordId::generate(),
        timestamp,
        category,
        importance,
        source: candidate.source,
        embedding_ref,
        payload,
        content_hash,
        ttl_class: retention.ttl_for(category),
        supersedes: candidate.supersedes,
    })
}
