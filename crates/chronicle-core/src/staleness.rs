//! Staleness detection via aggregate content hashing.
//!
//! The aggregate hash is SHA-256 over the sorted, newline-joined content
//! hashes of a record set. It depends only on content, so it is stable
//! across restarts and can be recomputed from the log alone.
//!
//! Detection never repairs anything. [`MemoryStore::reconcile`] is the one
//! operation that sets or clears per-record Stale flags.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use chronicle_state::{ContentHash, LogEntry, RecordId};

use crate::error::MemoryResult;
use crate::obs;
use crate::snapshot::ActiveSet;
use crate::store::MemoryStore;

/// Aggregate hash over a set of record content hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateHash(String);

impl StateHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl Default for StateHash {
    fn default() -> Self {
        aggregate_hash(std::iter::empty())
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StateHash {
    fn from(s: String) -> Self {
        StateHash(s)
    }
}

impl From<&str> for StateHash {
    fn from(s: &str) -> Self {
        StateHash(s.to_string())
    }
}

/// Order-independent aggregate over content hashes (duplicates count).
pub fn aggregate_hash<'a>(hashes: impl IntoIterator<Item = &'a ContentHash>) -> StateHash {
    let mut sorted: Vec<&str> = hashes.into_iter().map(ContentHash::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for h in sorted {
        hasher.update(h.as_bytes());
        hasher.update(b"\n");
    }
    StateHash(hex::encode(hasher.finalize()))
}

/// Result of comparing an expected hash against current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessReport {
    pub stale: bool,
    pub current_hash: StateHash,
}

/// Describes a cached derivative (e.g. a summary) built from specific records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCheckpoint {
    pub summary_id: String,
    pub source_ids: Vec<RecordId>,
    /// Aggregate hash of the sources when the summary was derived
    pub source_hash: StateHash,
}

impl SummaryCheckpoint {
    /// Capture a checkpoint over `source_ids` as they stand in `view`.
    pub fn capture(summary_id: impl Into<String>, source_ids: Vec<RecordId>, view: &ActiveSet) -> Self {
        let source_hash = subset_hash(view, &source_ids);
        Self {
            summary_id: summary_id.into(),
            source_ids,
            source_hash,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub stale_checkpoints: Vec<String>,
    pub flagged: Vec<RecordId>,
    pub cleared: Vec<RecordId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub mismatched: Vec<RecordId>,
}

/// Aggregate over those of `ids` that are active in `view`.
fn subset_hash(view: &ActiveSet, ids: &[RecordId]) -> StateHash {
    aggregate_hash(
        ids.iter()
            .filter_map(|id| view.get(id))
            .filter(|slot| slot.is_active())
            .map(|slot| &slot.record.content_hash),
    )
}

impl MemoryStore {
    /// Compare the store-wide aggregate hash against `expected`.
    pub async fn check(&self, expected: &StateHash) -> StalenessReport {
        let view = self.snapshot().await;
        let current_hash = view.state_hash().clone();
        let stale = &current_hash != expected;
        obs::emit_staleness_checked("store", stale, &current_hash);
        StalenessReport {
            stale,
            current_hash,
        }
    }

    /// Compare a checkpoint's source hash against its sources' current state.
    pub async fn check_checkpoint(&self, checkpoint: &SummaryCheckpoint) -> StalenessReport {
        let view = self.snapshot().await;
        let current_hash = subset_hash(&view, &checkpoint.source_ids);
        let stale = current_hash != checkpoint.source_hash;
        obs::emit_staleness_checked(&checkpoint.summary_id, stale, &current_hash);
        StalenessReport {
            stale,
            current_hash,
        }
    }

    /// Capture a checkpoint against the current view.
    pub async fn capture_checkpoint(
        &self,
        summary_id: impl Into<String>,
        source_ids: Vec<RecordId>,
    ) -> SummaryCheckpoint {
        let view = self.snapshot().await;
        SummaryCheckpoint::capture(summary_id, source_ids, &view)
    }

    /// Set Stale flags on sources of drifted checkpoints (and on records
    /// whose payload no longer matches its hash); clear them on sources of
    /// matching checkpoints whose payload re-verifies.
    #[instrument(skip_all, fields(checkpoints = checkpoints.len()))]
    pub async fn reconcile(&self, checkpoints: &[SummaryCheckpoint]) -> MemoryResult<ReconcileReport> {
        let view = self.snapshot().await;
        let mut report = ReconcileReport::default();
        let mut to_flag: Vec<(RecordId, Option<String>)> = Vec::new();
        let mut flag_ids = BTreeSet::new();
        let mut clear_ids = BTreeSet::new();

        for cp in checkpoints {
            let drifted = subset_hash(&view, &cp.source_ids) != cp.source_hash;
            if drifted {
                report.stale_checkpoints.push(cp.summary_id.clone());
            }
            for id in &cp.source_ids {
                let Some(slot) = view.get(id).filter(|s| s.is_active()) else {
                    continue;
                };
                if drifted || !slot.record.verify_content_hash() {
                    if flag_ids.insert(id.clone()) {
                        to_flag.push((id.clone(), Some(cp.summary_id.clone())));
                    }
                } else {
                    clear_ids.insert(id.clone());
                }
            }
        }

        for (id, checkpoint) in to_flag {
            let target = id.clone();
            let applied = self
                .commit_if(LogEntry::FlagStale { id, checkpoint }, |set| {
                    Ok(set.get(&target).is_some_and(|s| s.is_active() && !s.stale))
                })
                .await?;
            if applied {
                report.flagged.push(target);
            }
        }

        for id in clear_ids.difference(&flag_ids) {
            let target = id.clone();
            let applied = self
                .commit_if(LogEntry::ClearStale { id: id.clone() }, |set| {
                    Ok(set.get(&target).is_some_and(|s| s.is_active() && s.stale))
                })
                .await?;
            if applied {
                report.cleared.push(id.clone());
            }
        }

        obs::emit_reconciled(
            report.stale_checkpoints.len(),
            report.flagged.len(),
            report.cleared.len(),
        );
        Ok(report)
    }

    /// Re-hash every active payload and report records whose hash drifted.
    pub async fn verify_integrity(&self) -> IntegrityReport {
        let view = self.snapshot().await;
        let mut report = IntegrityReport::default();
        for slot in view.active() {
            report.checked += 1;
            if !slot.record.verify_content_hash() {
                report.mismatched.push(slot.record.id.clone());
            }
        }
        report.mismatched.sort();
        report
    }

    /// Aggregate hash recomputed from durable storage, ignoring the live view.
    pub async fn replayed_state_hash(&self) -> MemoryResult<StateHash> {
        let frames = self.log_frames().await?;
        Ok(ActiveSet::replay(&frames).state_hash().clone())
    }
}
