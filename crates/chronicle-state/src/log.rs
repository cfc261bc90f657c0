//! Storage trait for the append-only record log.
//!
//! Guarantees any implementation must uphold:
//! - `append` is all-or-nothing: after an error no frame is observable.
//! - Sequence numbers are strictly increasing and never reused.
//! - A `Write` frame for an id already present (including purged ids) is
//!   rejected with `StorageError::DuplicateId`.
//! - `compact` only removes frames belonging to ids that carry a `Purge`
//!   tombstone; the tombstone itself survives.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::StorageResult;
use crate::schema::{LogEntry, LogFrame, RecordId};

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStats {
    pub frames_retained: usize,
    pub frames_removed: usize,
}

/// Append-only, replayable record log.
pub trait RecordLog: Send {
    /// Durably append an entry and return its sequence number.
    fn append(&mut self, entry: LogEntry) -> StorageResult<u64>;

    /// Every committed frame in append order.
    fn frames(&self) -> StorageResult<Vec<LogFrame>>;

    /// Physically drop frames of purged records.
    fn compact(&mut self) -> StorageResult<CompactionStats>;

    /// Sequence number the next append will receive.
    fn next_seq(&self) -> u64;
}

/// Ids carrying a `Purge` tombstone.
pub(crate) fn purged_ids(frames: &[LogFrame]) -> HashSet<RecordId> {
    frames
        .iter()
        .filter_map(|f| match &f.entry {
            LogEntry::Purge { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect()
}

/// Split frames into (kept, removed_count) for compaction.
pub(crate) fn retain_unpurged(frames: Vec<LogFrame>) -> (Vec<LogFrame>, usize) {
    let purged = purged_ids(&frames);
    let before = frames.len();
    let kept: Vec<LogFrame> = frames
        .into_iter()
        .filter(|f| {
            matches!(f.entry, LogEntry::Purge { .. }) || !purged.contains(f.entry.record_id())
        })
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}
