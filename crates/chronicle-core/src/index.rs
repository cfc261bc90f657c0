//! Boundary to the external similarity index.
//!
//! The store never indexes vectors itself. It hands the index the set of
//! ids that are currently eligible and gets back `(id, similarity)` pairs.
//! The index need not know about TTLs, categories, or lifecycle.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chronicle_state::RecordId;

/// Errors reported by a similarity index implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// One nearest-neighbor hit, in the index's own metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: RecordId,
    pub similarity: f64,
}

impl Neighbor {
    pub fn new(id: impl Into<RecordId>, similarity: f64) -> Self {
        Self {
            id: id.into(),
            similarity,
        }
    }
}

/// Nearest-neighbor capability consumed by the query engine.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Up to `k` nearest candidates to `vector`, restricted to `active_ids`.
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        active_ids: &HashSet<RecordId>,
    ) -> Result<Vec<Neighbor>, IndexError>;
}
