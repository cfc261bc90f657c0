//! In-memory fake for the record log (testing only)
//!
//! `MemoryRecordLog` satisfies the `RecordLog` contract without touching
//! the filesystem. A shared fault switch lets tests force append failures
//! after the log has been handed to a store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{StorageError, StorageResult};
use crate::log::{retain_unpurged, CompactionStats, RecordLog};
use crate::schema::{LogEntry, LogFrame, RecordId};

/// In-memory record log backed by a `Vec<LogFrame>`.
#[derive(Debug, Default)]
pub struct MemoryRecordLog {
    frames: Arc<Mutex<Vec<LogFrame>>>,
    written: HashSet<RecordId>,
    next_seq: u64,
    fail_appends: Arc<AtomicBool>,
}

impl MemoryRecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log with frames, as if replaying a previous session.
    pub fn with_frames(frames: Vec<LogFrame>) -> Self {
        let next_seq = frames.last().map(|f| f.seq + 1).unwrap_or(0);
        let written = frames
            .iter()
            .filter_map(|f| match &f.entry {
                LogEntry::Write { record } => Some(record.id.clone()),
                LogEntry::Purge { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        Self {
            frames: Arc::new(Mutex::new(frames)),
            written,
            next_seq,
            fail_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While set, every append fails with an I/O error.
    pub fn fault_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_appends)
    }

    /// Read handle onto the committed frames.
    pub fn frames_handle(&self) -> Arc<Mutex<Vec<LogFrame>>> {
        Arc::clone(&self.frames)
    }
}

impl RecordLog for MemoryRecordLog {
    fn append(&mut self, entry: LogEntry) -> StorageResult<u64> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected append failure",
            )));
        }
        if let LogEntry::Write { record } = &entry {
            if self.written.contains(&record.id) {
                return Err(StorageError::DuplicateId {
                    id: record.id.to_string(),
                });
            }
            self.written.insert(record.id.clone());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.frames.lock().unwrap().push(LogFrame { seq, entry });
        Ok(seq)
    }

    fn frames(&self) -> StorageResult<Vec<LogFrame>> {
        Ok(self.frames.lock().unwrap().clone())
    }

    fn compact(&mut self) -> StorageResult<CompactionStats> {
        let mut frames = self.frames.lock().unwrap();
        let (kept, removed) = retain_unpurged(std::mem::take(&mut *frames));
        let retained = kept.len();
        *frames = kept;
        Ok(CompactionStats {
            frames_retained: retained,
            frames_removed: removed,
        })
    }

    fn next_seq(&self) -> u64 {
        self.next_seq
    }
}
