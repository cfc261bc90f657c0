//! Structured observability hooks for memory store lifecycle events.
//!
//! Every helper logs a stable `event = "memory.*"` key so log pipelines can
//! filter on it. Verbosity follows `RUST_LOG`; see [`crate::telemetry`].

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use chronicle_state::{Category, ContentHash, RecordId};

use crate::ingest::WriteOutcome;
use crate::staleness::StateHash;

/// RAII guard that enters a store-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = StoreSpan::enter("records.jsonl");
/// // every event below carries store = "records.jsonl"
/// ```
pub struct StoreSpan {
    _span: tracing::span::EnteredSpan,
}

impl StoreSpan {
    pub fn enter(store: &str) -> Self {
        let span = tracing::info_span!("chronicle.store", store = %store);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a record was appended and published.
pub fn emit_record_ingested(
    id: &RecordId,
    category: Category,
    content_hash: &ContentHash,
    outcome: WriteOutcome,
) {
    info!(
        event = "memory.ingested",
        id = %id,
        category = %category,
        content_hash = %content_hash.short(),
        outcome = ?outcome,
    );
}

/// Emit event: an idempotent write resolved to an existing record.
pub fn emit_record_deduplicated(id: &RecordId, category: Category) {
    info!(event = "memory.deduplicated", id = %id, category = %category);
}

/// Emit event: a query finished with `returned` of `candidates` scored hits.
pub fn emit_query_completed(candidates: usize, returned: usize, top_k: usize) {
    info!(
        event = "memory.query_completed",
        candidates = candidates,
        returned = returned,
        top_k = top_k,
    );
}

/// The index returned ids outside the eligible set.
pub fn emit_index_out_of_sync(unknown_ids: &[RecordId]) {
    warn!(
        event = "memory.index_out_of_sync",
        unknown = unknown_ids.len(),
        first = %unknown_ids.first().map(RecordId::as_str).unwrap_or(""),
    );
}

/// Emit event: a retention pass finished.
///
/// ```ignore
/// emit_prune_completed(now, 3, 1);
/// // logs: event=memory.prune_completed now=... expired=3 purged=1
/// ```
pub fn emit_prune_completed(now: DateTime<Utc>, expired: usize, purged: usize) {
    info!(
        event = "memory.prune_completed",
        now = %now,
        expired = expired,
        purged = purged,
    );
}

/// Emit event: ingest hit the soft limit and triggered a prune (warning level).
pub fn emit_capacity_remediation(held: usize, limit: usize) {
    warn!(event = "memory.capacity_remediation", held = held, limit = limit);
}

pub fn emit_staleness_checked(scope: &str, stale: bool, current_hash: &StateHash) {
    info!(
        event = "memory.staleness_checked",
        scope = %scope,
        stale = stale,
        current_hash = %current_hash.short(),
    );
}

pub fn emit_reconciled(stale_checkpoints: usize, flagged: usize, cleared: usize) {
    info!(
        event = "memory.reconciled",
        stale_checkpoints = stale_checkpoints,
        flagged = flagged,
        cleared = cleared,
    );
}
