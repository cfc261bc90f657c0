//! The memory store facade.
//!
//! Owns the record log (the single shared mutable resource) and the
//! published `ActiveSet`. Every mutation goes through [`MemoryStore::commit_if`]:
//! appends are serialized by the log mutex, and the view is updated under a
//! synchronous lock held only for the append and apply, so a cancelled
//! caller can never leave an appended frame unpublished.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use chronicle_state::fakes::MemoryRecordLog;
use chronicle_state::{
    CompactionStats, FileRecordLog, LogEntry, LogFrame, MemoryRecord, RecordId, RecordLog,
};

use crate::config::StoreConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::index::SimilarityIndex;
use crate::locks::KeyLocks;
use crate::snapshot::ActiveSet;
use crate::staleness::StateHash;

/// Counts describing the current view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub active: usize,
    pub expired: usize,
    pub stale: usize,
    pub superseded: usize,
    pub purged: usize,
    pub version: u64,
    pub state_hash: StateHash,
}

pub struct MemoryStore {
    pub(crate) config: StoreConfig,
    log: Mutex<Box<dyn RecordLog>>,
    view: RwLock<Arc<ActiveSet>>,
    pub(crate) index: Arc<dyn SimilarityIndex>,
    pub(crate) key_locks: KeyLocks,
    /// Last timestamp seen per source
    pub(crate) sources: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open a store over `log`, rebuilding the active set by replay.
    pub fn open(
        config: StoreConfig,
        log: Box<dyn RecordLog>,
        index: Arc<dyn SimilarityIndex>,
    ) -> MemoryResult<Self> {
        config.validate()?;
        let frames = log.frames()?;
        let view = ActiveSet::replay(&frames);
        info!(
            frames = frames.len(),
            active = view.active().count(),
            state_hash = %view.state_hash().short(),
            "memory store opened"
        );
        Ok(Self {
            config,
            log: Mutex::new(log),
            view: RwLock::new(Arc::new(view)),
            index,
            key_locks: KeyLocks::default(),
            sources: Mutex::new(HashMap::new()),
        })
    }

    /// Store backed by a JSON-lines log file at `path`.
    pub fn open_file(
        config: StoreConfig,
        path: impl AsRef<Path>,
        index: Arc<dyn SimilarityIndex>,
    ) -> MemoryResult<Self> {
        let log = FileRecordLog::open(path)?;
        Self::open(config, Box::new(log), index)
    }

    /// Non-durable store, for tests and ephemeral sessions.
    pub fn in_memory(config: StoreConfig, index: Arc<dyn SimilarityIndex>) -> MemoryResult<Self> {
        Self::open(config, Box::new(MemoryRecordLog::new()), index)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Consistent view as of this call.
    pub async fn snapshot(&self) -> Arc<ActiveSet> {
        let view = self.view.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*view)
    }

    /// Append `entry` and publish it if `precondition` holds on the current view.
    ///
    /// Returns `Ok(false)` when the precondition declines. Nothing is
    /// published unless the append succeeded. The only suspension point is
    /// acquiring the log mutex; append and publish run without yielding.
    pub(crate) async fn commit_if<F>(&self, entry: LogEntry, precondition: F) -> MemoryResult<bool>
    where
        F: FnOnce(&ActiveSet) -> MemoryResult<bool>,
    {
        let mut log = self.log.lock().await;
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        if !precondition(&**view)? {
            return Ok(false);
        }

        let seq = log.append(entry.clone())?;
        // Copies the set only while a reader still holds the previous snapshot.
        Arc::make_mut(&mut *view).apply(&LogFrame { seq, entry });
        debug!(seq, "published view");
        Ok(true)
    }

    /// Drop purged payloads from durable storage.
    ///
    /// Readers work from in-memory snapshots, so holding the log mutex is
    /// enough to guarantee nobody reads the region being rewritten.
    pub(crate) async fn compact_log(&self) -> MemoryResult<CompactionStats> {
        let mut log = self.log.lock().await;
        Ok(log.compact()?)
    }

    /// Frames currently in durable storage.
    pub async fn log_frames(&self) -> MemoryResult<Vec<LogFrame>> {
        let log = self.log.lock().await;
        Ok(log.frames()?)
    }

    /// Look up an active record. Expired, purged, and unknown ids are `NotFound`.
    pub async fn get(&self, id: &RecordId) -> MemoryResult<Arc<MemoryRecord>> {
        let view = self.snapshot().await;
        view.get(id)
            .filter(|slot| slot.is_active())
            .map(|slot| Arc::clone(&slot.record))
            .ok_or_else(|| MemoryError::NotFound { id: id.clone() })
    }

    /// `id` followed by every record it transitively supersedes that is still held.
    pub async fn lineage(&self, id: &RecordId) -> MemoryResult<Vec<Arc<MemoryRecord>>> {
        let view = self.snapshot().await;
        let head = view
            .get(id)
            .filter(|slot| slot.is_active())
            .ok_or_else(|| MemoryError::NotFound { id: id.clone() })?;

        let mut chain = vec![Arc::clone(&head.record)];
        let mut cursor = head.record.supersedes.clone();
        while let Some(prev) = cursor {
            match view.get(&prev) {
                Some(slot) if !chain.iter().any(|r| r.id == prev) => {
                    chain.push(Arc::clone(&slot.record));
                    cursor = slot.record.supersedes.clone();
                }
                _ => break,
            }
        }
        Ok(chain)
    }

    pub async fn stats(&self) -> StoreStats {
        let view = self.snapshot().await;
        let active: Vec<_> = view.active().collect();
        StoreStats {
            active: active.len(),
            expired: view.expired().count(),
            stale: active.iter().filter(|s| s.stale).count(),
            superseded: active.iter().filter(|s| s.superseded_by.is_some()).count(),
            purged: view.retired_count(),
            version: view.version(),
            state_hash: view.state_hash().clone(),
        }
    }
}
