//! Query engine: eligibility filtering, index lookup, decay scoring, ranking.
//!
//! Read-only. A query works against one snapshot, so cancelling it (dropping
//! the future) needs no cleanup.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use chronicle_state::{Category, MemoryRecord, RecordId};

use crate::config::QueryDefaults;
use crate::error::{MemoryError, MemoryResult, ValidationError};
use crate::index::Neighbor;
use crate::obs;
use crate::scorer::{score, DecayParams};
use crate::snapshot::{ActiveSet, RecordSlot};
use crate::store::MemoryStore;

/// Parameters for a ranked lookup.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub vector: Vec<f32>,
    pub category: Option<Category>,
    /// Hard cutoff: records older than `now - time_window` are excluded
    pub time_window: Option<chrono::Duration>,
    /// Defaults to the configured `default_top_k`
    pub top_k: Option<usize>,
    /// Defaults to the configured decay parameters
    pub decay: Option<DecayParams>,
    pub now: DateTime<Utc>,
}

impl MemoryQuery {
    pub fn new(vector: Vec<f32>, now: DateTime<Utc>) -> Self {
        Self {
            vector,
            category: None,
            time_window: None,
            top_k: None,
            decay: None,
            now,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_time_window(mut self, window: chrono::Duration) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_decay(mut self, decay: DecayParams) -> Self {
        self.decay = Some(decay);
        self
    }
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Arc<MemoryRecord>,
    pub score: f64,
    /// Similarity as reported by the index, after convention mapping
    pub similarity: f64,
    pub stale: bool,
}

/// Fully resolved query parameters.
struct Plan {
    top_k: usize,
    decay: DecayParams,
    window: Option<chrono::Duration>,
}

fn plan(q: &MemoryQuery, defaults: &QueryDefaults, decay: &DecayParams) -> Result<Plan, ValidationError> {
    if q.vector.is_empty() {
        return Err(ValidationError::EmptyVector);
    }
    let top_k = q.top_k.unwrap_or(defaults.default_top_k);
    if top_k == 0 {
        return Err(ValidationError::ZeroTopK);
    }
    let decay = q.decay.unwrap_or(*decay);
    decay.validate()?;
    let window = match q.time_window {
        Some(w) if w < chrono::Duration::zero() => return Err(ValidationError::NegativeTimeWindow),
        Some(w) => Some(w),
        None => defaults
            .default_time_window_seconds
            .and_then(|s| chrono::Duration::try_seconds(i64::try_from(s).ok()?)),
    };
    Ok(Plan {
        top_k,
        decay,
        window,
    })
}

/// Whether a slot may appear in results for `q` at `q.now`.
fn eligible(slot: &RecordSlot, q: &MemoryQuery, window: Option<chrono::Duration>, include_superseded: bool) -> bool {
    let record = &slot.record;
    if !slot.is_active() || record.ttl_class.is_elapsed(record.timestamp, q.now) {
        return false;
    }
    if !include_superseded && slot.superseded_by.is_some() {
        return false;
    }
    if q.category.is_some_and(|c| c != record.category) {
        return false;
    }
    if let Some(window) = window {
        if let Some(cutoff) = q.now.checked_sub_signed(window) {
            if record.timestamp < cutoff {
                return false;
            }
        }
    }
    true
}

fn eligible_ids(view: &ActiveSet, q: &MemoryQuery, plan: &Plan, include_superseded: bool) -> HashSet<RecordId> {
    view.active()
        .filter(|slot| eligible(slot, q, plan.window, include_superseded))
        .map(|slot| slot.record.id.clone())
        .collect()
}

/// Descending score, then newer timestamp, then ascending id.
pub fn rank(mut results: Vec<ScoredRecord>, top_k: usize) -> Vec<ScoredRecord> {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    results.truncate(top_k);
    results
}

impl MemoryStore {
    /// Ranked nearest records for `q`.
    ///
    /// Returns an empty list when nothing is eligible. Hits the index
    /// reports for ids outside the eligible set are dropped; if that leaves
    /// nothing, the hits are re-checked once against a fresh snapshot before
    /// surfacing `StaleIndex`.
    #[instrument(skip_all, fields(category = ?q.category, now = %q.now))]
    pub async fn query(&self, q: &MemoryQuery) -> MemoryResult<Vec<ScoredRecord>> {
        let plan = plan(q, &self.config.query, &self.config.decay)?;
        let include_superseded = self.config.query.include_superseded;

        let mut view = self.snapshot().await;
        let mut allowed = eligible_ids(&view, q, &plan, include_superseded);
        if allowed.is_empty() {
            obs::emit_query_completed(0, 0, plan.top_k);
            return Ok(Vec::new());
        }

        let k = plan
            .top_k
            .saturating_mul(self.config.query.candidate_multiplier)
            .min(allowed.len())
            .max(plan.top_k);
        let hits = self.index.nearest(&q.vector, k, &allowed).await?;

        let (mut usable, unknown): (Vec<Neighbor>, Vec<Neighbor>) =
            hits.iter().cloned().partition(|n| allowed.contains(&n.id));
        if !unknown.is_empty() {
            let unknown_ids: Vec<RecordId> = unknown.iter().map(|n| n.id.clone()).collect();
            obs::emit_index_out_of_sync(&unknown_ids);
            if usable.is_empty() {
                view = self.snapshot().await;
                allowed = eligible_ids(&view, q, &plan, include_superseded);
                usable = hits.into_iter().filter(|n| allowed.contains(&n.id)).collect();
                if usable.is_empty() {
                    return Err(MemoryError::StaleIndex { unknown_ids });
                }
            }
        }

        let mut seen = HashSet::new();
        let scored: Vec<ScoredRecord> = usable
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .filter_map(|n| {
                let slot = view.get(&n.id)?;
                let similarity = self.config.similarity.to_similarity(n.similarity);
                Some(ScoredRecord {
                    score: score(similarity, &slot.record, q.now, &plan.decay),
                    record: Arc::clone(&slot.record),
                    similarity,
                    stale: slot.stale,
                })
            })
            .collect();

        let candidates = scored.len();
        let ranked = rank(scored, plan.top_k);
        obs::emit_query_completed(candidates, ranked.len(), plan.top_k);
        Ok(ranked)
    }
}
