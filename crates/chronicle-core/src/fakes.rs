//! In-process similarity indexes (testing only)
//!
//! - `ExactIndex`: brute-force cosine similarity over stored vectors
//! - `ScriptedIndex`: returns canned hits, optionally after a delay

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use chronicle_state::RecordId;

use crate::index::{IndexError, Neighbor, SimilarityIndex};

/// Exact nearest-neighbor search by cosine similarity.
#[derive(Debug, Default, Clone)]
pub struct ExactIndex {
    vectors: Arc<RwLock<HashMap<RecordId, Vec<f32>>>>,
}

impl ExactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<RecordId>, vector: Vec<f32>) {
        self.vectors.write().unwrap().insert(id.into(), vector);
    }

    pub fn remove(&self, id: &RecordId) {
        self.vectors.write().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.vectors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        na += f64::from(*x) * f64::from(*x);
        nb += f64::from(*y) * f64::from(*y);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[async_trait]
impl SimilarityIndex for ExactIndex {
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        active_ids: &HashSet<RecordId>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let vectors = self.vectors.read().unwrap();
        let mut hits = Vec::new();
        for (id, stored) in vectors.iter().filter(|(id, _)| active_ids.contains(*id)) {
            if stored.len() != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: stored.len(),
                    actual: vector.len(),
                });
            }
            hits.push(Neighbor {
                id: id.clone(),
                similarity: cosine(vector, stored),
            });
        }
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Index that ignores the query and returns whatever it was told to.
///
/// Hits are returned unfiltered, so tests can simulate an index that has
/// drifted out of sync with the store.
#[derive(Debug, Default, Clone)]
pub struct ScriptedIndex {
    hits: Arc<RwLock<Vec<Neighbor>>>,
    delay: Option<Duration>,
    fail: Arc<RwLock<Option<String>>>,
}

impl ScriptedIndex {
    pub fn new(hits: Vec<Neighbor>) -> Self {
        Self {
            hits: Arc::new(RwLock::new(hits)),
            ..Self::default()
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_hits(&self, hits: Vec<Neighbor>) {
        *self.hits.write().unwrap() = hits;
    }

    /// Make every lookup fail with `Unavailable(reason)`; `None` restores it.
    pub fn set_failure(&self, reason: Option<String>) {
        *self.fail.write().unwrap() = reason;
    }
}

#[async_trait]
impl SimilarityIndex for ScriptedIndex {
    async fn nearest(
        &self,
        _vector: &[f32],
        k: usize,
        _active_ids: &HashSet<RecordId>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.fail.read().unwrap().clone() {
            return Err(IndexError::Unavailable(reason));
        }
        let mut hits = self.hits.read().unwrap().clone();
        hits.truncate(k);
        Ok(hits)
    }
}
