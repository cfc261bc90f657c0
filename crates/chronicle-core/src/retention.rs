//! Retention: TTL expiry followed by grace-period purge.
//!
//! `prune(now)` is invoked by an external scheduler with an injected clock.
//! Each transition claims only the affected record's key, so queries and
//! unrelated writes proceed during a sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use chronicle_state::{LogEntry, RecordId};

use crate::error::MemoryResult;
use crate::obs;
use crate::snapshot::{dedup_key, ActiveSet, DedupKey, RecordStatus};
use crate::store::MemoryStore;

/// Counts from a single `prune` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub expired_count: usize,
    pub purged_count: usize,
}

/// Active records whose TTL has elapsed at `now`, oldest first.
pub fn due_for_expiry(view: &ActiveSet, now: DateTime<Utc>) -> Vec<(RecordId, DedupKey)> {
    let mut due: Vec<_> = view
        .active()
        .filter(|slot| slot.record.ttl_class.is_elapsed(slot.record.timestamp, now))
        .map(|slot| (slot.record.timestamp, slot.record.id.clone(), dedup_key(&slot.record)))
        .collect();
    due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    due.into_iter().map(|(_, id, key)| (id, key)).collect()
}

/// Expired records whose grace period has run out at `now`.
pub fn due_for_purge(
    view: &ActiveSet,
    now: DateTime<Utc>,
    grace: chrono::Duration,
) -> Vec<(RecordId, DedupKey)> {
    let mut due: Vec<_> = view
        .expired()
        .filter(|slot| match slot.status {
            RecordStatus::Expired { at } => now.signed_duration_since(at) >= grace,
            RecordStatus::Active => false,
        })
        .map(|slot| (slot.record.id.clone(), dedup_key(&slot.record)))
        .collect();
    due.sort_by(|a, b| a.0.cmp(&b.0));
    due
}

impl MemoryStore {
    /// Expire records past their TTL and purge those past the grace period.
    ///
    /// Idempotent for a fixed `now`: a second call changes nothing.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn prune(&self, now: DateTime<Utc>) -> MemoryResult<PruneStats> {
        let mut stats = PruneStats::default();

        let view = self.snapshot().await;
        for (id, key) in due_for_expiry(&view, now) {
            let _claim = self.key_locks.acquire(&key).await;
            let target = id.clone();
            if self
                .commit_if(LogEntry::Expire { id, at: now }, |current| {
                    Ok(current.is_active(&target))
                })
                .await?
            {
                stats.expired_count += 1;
            }
        }

        let grace = self.config.retention.purge_grace();
        let view = self.snapshot().await;
        for (id, key) in due_for_purge(&view, now, grace) {
            let _claim = self.key_locks.acquire(&key).await;
            let target = id.clone();
            if self
                .commit_if(LogEntry::Purge { id, at: now }, |current| {
                    Ok(current.get(&target).is_some_and(|s| !s.is_active()))
                })
                .await?
            {
                stats.purged_count += 1;
            }
        }

        if stats.purged_count > 0 {
            self.compact_log().await?;
        }

        obs::emit_prune_completed(now, stats.expired_count, stats.purged_count);
        Ok(stats)
    }
}
