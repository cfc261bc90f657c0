//! Immutable view of the store, rebuilt from log frames.
//!
//! Readers hold an `Arc<ActiveSet>` for the duration of an operation and
//! never observe a half-applied change. The store mutates the published set
//! in place when no reader holds it and copies it otherwise.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use chronicle_state::{Category, ContentHash, LogEntry, LogFrame, MemoryRecord, RecordId};

use crate::staleness::{aggregate_hash, StateHash};

/// Deduplication key: the same content may live once per category.
pub type DedupKey = (Category, ContentHash);

pub fn dedup_key(record: &MemoryRecord) -> DedupKey {
    (record.category, record.content_hash.clone())
}

/// Lifecycle position of a held record. Purged records are not held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Expired { at: DateTime<Utc> },
}

/// A held record plus its mutable lifecycle bits.
#[derive(Debug, Clone)]
pub struct RecordSlot {
    pub record: Arc<MemoryRecord>,
    pub status: RecordStatus,
    pub stale: bool,
    pub superseded_by: Option<RecordId>,
}

impl RecordSlot {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Point-in-time view of every held record.
#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    slots: HashMap<RecordId, RecordSlot>,
    /// Latest active, non-superseded id per dedup key
    dedup: HashMap<DedupKey, RecordId>,
    retired: HashSet<RecordId>,
    version: u64,
    high_water: Option<DateTime<Utc>>,
    /// Multiset of active content hashes, kept sorted for hashing
    hash_counts: BTreeMap<ContentHash, usize>,
    /// Computed on first read after a change
    state_hash: OnceLock<StateHash>,
}

impl ActiveSet {
    /// Rebuild the view from log frames alone.
    pub fn replay(frames: &[LogFrame]) -> Self {
        let mut set = ActiveSet::default();
        for frame in frames {
            set.apply(frame);
        }
        set
    }

    /// Apply one frame. Cost does not depend on the number of held records.
    pub(crate) fn apply(&mut self, frame: &LogFrame) {
        self.version = frame.seq + 1;
        self.state_hash = OnceLock::new();
        match &frame.entry {
            LogEntry::Write { record } => {
                if let Some(old) = &record.supersedes {
                    if let Some(slot) = self.slots.get_mut(old) {
                        slot.superseded_by = Some(record.id.clone());
                        let old_key = dedup_key(&slot.record);
                        if self.dedup.get(&old_key) == Some(old) {
                            self.dedup.remove(&old_key);
                        }
                    }
                }
                self.high_water = Some(match self.high_water {
                    Some(hw) if hw > record.timestamp => hw,
                    _ => record.timestamp,
                });
                self.dedup.insert(dedup_key(record), record.id.clone());
                *self
                    .hash_counts
                    .entry(record.content_hash.clone())
                    .or_insert(0) += 1;
                self.slots.insert(
                    record.id.clone(),
                    RecordSlot {
                        record: Arc::new(record.clone()),
                        status: RecordStatus::Active,
                        stale: false,
                        superseded_by: None,
                    },
                );
            }
            LogEntry::Expire { id, at } => {
                let mut released = None;
                if let Some(slot) = self.slots.get_mut(id) {
                    if slot.is_active() {
                        released = Some(slot.record.content_hash.clone());
                    }
                    slot.status = RecordStatus::Expired { at: *at };
                    let key = dedup_key(&slot.record);
                    if self.dedup.get(&key) == Some(id) {
                        self.dedup.remove(&key);
                    }
                }
                if let Some(hash) = released {
                    self.release_hash(&hash);
                }
            }
            LogEntry::Purge { id, .. } => {
                if let Some(slot) = self.slots.remove(id) {
                    if slot.is_active() {
                        self.release_hash(&slot.record.content_hash);
                    }
                    let key = dedup_key(&slot.record);
                    if self.dedup.get(&key) == Some(id) {
                        self.dedup.remove(&key);
                    }
                }
                self.retired.insert(id.clone());
            }
            LogEntry::FlagStale { id, .. } => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.stale = true;
                }
            }
            LogEntry::ClearStale { id } => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.stale = false;
                }
            }
        }
    }

    fn release_hash(&mut self, hash: &ContentHash) {
        if let Some(count) = self.hash_counts.get_mut(hash) {
            *count -= 1;
            if *count == 0 {
                self.hash_counts.remove(hash);
            }
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<&RecordSlot> {
        self.slots.get(id)
    }

    pub fn is_active(&self, id: &RecordId) -> bool {
        self.slots.get(id).is_some_and(RecordSlot::is_active)
    }

    pub fn is_retired(&self, id: &RecordId) -> bool {
        self.retired.contains(id)
    }

    /// Active slot currently owning `key`, if any.
    pub fn dedup_lookup(&self, key: &DedupKey) -> Option<&RecordSlot> {
        self.dedup
            .get(key)
            .and_then(|id| self.slots.get(id))
            .filter(|slot| slot.is_active())
    }

    pub fn active(&self) -> impl Iterator<Item = &RecordSlot> {
        self.slots.values().filter(|s| s.is_active())
    }

    pub fn expired(&self) -> impl Iterator<Item = &RecordSlot> {
        self.slots.values().filter(|s| !s.is_active())
    }

    /// Records held in storage (active + expired).
    pub fn held(&self) -> usize {
        self.slots.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Sequence number the next applied frame will carry.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Latest record timestamp ever written: the store's logical clock.
    pub fn high_water(&self) -> Option<DateTime<Utc>> {
        self.high_water
    }

    /// Aggregate hash of active content, computed lazily.
    pub fn state_hash(&self) -> &StateHash {
        self.state_hash.get_or_init(|| {
            aggregate_hash(
                self.hash_counts
                    .iter()
                    .flat_map(|(hash, count)| std::iter::repeat(hash).take(*count)),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_state::{EmbeddingRef, TtlClass};
    use chrono::TimeZone;

    fn record(id: &str, text: &str, secs: i64) -> MemoryRecord {
        let payload = serde_json::json!(text);
        MemoryRecord {
            id: RecordId::from(id),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            category: Category::Workflow,
            importance: 0.5,
            source: "test".into(),
            embedding_ref: EmbeddingRef::from(id),
            content_hash: ContentHash::of_payload(&payload).unwrap(),
            payload,
            ttl_class: TtlClass::Never,
            supersedes: None,
        }
    }

    fn frames(entries: Vec<LogEntry>) -> Vec<LogFrame> {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| LogFrame {
                seq: i as u64,
                entry,
            })
            .collect()
    }

    #[test]
    fn test_replay_lifecycle() {
        let at = Utc.timestamp_opt(50, 0).unwrap();
        let set = ActiveSet::replay(&frames(vec![
            LogEntry::Write {
                record: record("a", "alpha", 10),
            },
            LogEntry::Write {
                record: record("b", "beta", 20),
            },
            LogEntry::Write {
                record: record("c", "gamma", 30),
            },
            LogEntry::Expire {
                id: RecordId::from("b"),
                at,
            },
            LogEntry::Expire {
                id: RecordId::from("c"),
                at,
            },
            LogEntry::Purge {
                id: RecordId::from("c"),
                at,
            },
        ]));

        assert!(set.is_active(&RecordId::from("a")));
        assert!(!set.is_active(&RecordId::from("b")));
        assert!(set.get(&RecordId::from("c")).is_none());
        assert!(set.is_retired(&RecordId::from("c")));
        assert_eq!(set.active().count(), 1);
        assert_eq!(set.held(), 2);
        assert_eq!(set.version(), 6);
        assert_eq!(set.high_water(), Some(Utc.timestamp_opt(30, 0).unwrap()));
    }

    #[test]
    fn test_supersede_moves_dedup_ownership() {
        let mut newer = record("b", "alpha v2", 20);
        newer.supersedes = Some(RecordId::from("a"));
        let old = record("a", "alpha", 10);
        let old_key = dedup_key(&old);
        let set = ActiveSet::replay(&frames(vec![
            LogEntry::Write { record: old },
            LogEntry::Write {
                record: newer.clone(),
            },
        ]));

        let a = set.get(&RecordId::from("a")).unwrap();
        assert_eq!(a.superseded_by, Some(RecordId::from("b")));
        assert!(a.is_active());
        assert!(set.dedup_lookup(&old_key).is_none());
        assert_eq!(
            set.dedup_lookup(&dedup_key(&newer)).unwrap().record.id,
            RecordId::from("b")
        );
    }

    #[test]
    fn test_state_hash_ignores_insertion_order() {
        let a = ActiveSet::replay(&frames(vec![
            LogEntry::Write {
                record: record("a", "alpha", 10),
            },
            LogEntry::Write {
                record: record("b", "beta", 20),
            },
        ]));
        let b = ActiveSet::replay(&frames(vec![
            LogEntry::Write {
                record: record("b", "beta", 20),
            },
            LogEntry::Write {
                record: record("a", "alpha", 10),
            },
        ]));
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_incremental_hash_matches_full_recompute() {
        let at = Utc.timestamp_opt(90, 0).unwrap();
        let mut twin = record("e", "alpha", 15);
        twin.category = Category::General;
        let mut set = ActiveSet::replay(&frames(vec![
            LogEntry::Write {
                record: record("a", "alpha", 10),
            },
            LogEntry::Write { record: twin },
            LogEntry::Write {
                record: record("b", "beta", 20),
            },
            LogEntry::Write {
                record: record("c", "gamma", 30),
            },
            LogEntry::Expire {
                id: RecordId::from("b"),
                at,
            },
            LogEntry::Expire {
                id: RecordId::from("b"),
                at,
            },
            LogEntry::Purge {
                id: RecordId::from("b"),
                at,
            },
            LogEntry::Purge {
                id: RecordId::from("c"),
                at,
            },
        ]));
        let full = |set: &ActiveSet| aggregate_hash(set.active().map(|s| &s.record.content_hash));
        assert_eq!(set.state_hash(), &full(&set));

        // Cached hash is dropped once another frame lands.
        let before = set.state_hash().clone();
        set.apply(&LogFrame {
            seq: 8,
            entry: LogEntry::Write {
                record: record("d", "delta", 40),
            },
        });
        assert_ne!(set.state_hash(), &before);
        assert_eq!(set.state_hash(), &full(&set));
    }

    #[test]
    fn test_stale_flag_toggles() {
        let set = ActiveSet::replay(&frames(vec![
            LogEntry::Write {
                record: record("a", "alpha", 10),
            },
            LogEntry::FlagStale {
                id: RecordId::from("a"),
                checkpoint: Some("summary-1".into()),
            },
        ]));
        assert!(set.get(&RecordId::from("a")).unwrap().stale);

        let mut set = set;
        set.apply(&LogFrame {
            seq: 2,
            entry: LogEntry::ClearStale {
                id: RecordId::from("a"),
            },
        });
        assert!(!set.get(&RecordId::from("a")).unwrap().stale);
    }
}
