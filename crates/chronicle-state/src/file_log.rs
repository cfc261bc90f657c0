use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::log::{retain_unpurged, CompactionStats, RecordLog};
use crate::schema::{LogEntry, LogFrame, RecordId};

/// File-backed record log: one JSON frame per line.
///
/// Only newline-terminated lines are committed. A trailing fragment left
/// by a crash mid-append is truncated away on open; one left by a failed
/// append in this process is cut off before the next append.
pub struct FileRecordLog {
    path: PathBuf,
    file: File,
    next_seq: u64,
    /// File length covering exactly the committed frames
    committed_len: u64,
    written: HashSet<RecordId>,
}

struct Scan {
    frames: Vec<LogFrame>,
    committed_len: u64,
    torn: bool,
}

fn scan(path: &Path) -> StorageResult<Scan> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Scan {
                frames: Vec::new(),
                committed_len: 0,
                torn: false,
            })
        }
        Err(e) => return Err(e.into()),
    };

    let mut frames = Vec::new();
    let mut offset = 0usize;
    let mut line_no = 0usize;
    while offset < bytes.len() {
        line_no += 1;
        let Some(rel_end) = bytes[offset..].iter().position(|b| *b == b'\n') else {
            // Unterminated tail: an append that never completed.
            return Ok(Scan {
                frames,
                committed_len: offset as u64,
                torn: true,
            });
        };
        let line = &bytes[offset..offset + rel_end];
        offset += rel_end + 1;
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let frame: LogFrame =
            serde_json::from_slice(line).map_err(|e| StorageError::CorruptEntry {
                line: line_no,
                reason: e.to_string(),
            })?;
        frames.push(frame);
    }

    Ok(Scan {
        frames,
        committed_len: offset as u64,
        torn: false,
    })
}

fn open_append(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl FileRecordLog {
    /// Open (or create) the log at `path`, recovering from a torn tail.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let scan = scan(&path)?;
        if scan.torn {
            warn!(
                path = %path.display(),
                committed_len = scan.committed_len,
                "truncating torn trailing log entry"
            );
            let f = OpenOptions::new().write(true).open(&path)?;
            f.set_len(scan.committed_len)?;
            f.sync_all()?;
        }

        let next_seq = scan.frames.last().map(|f| f.seq + 1).unwrap_or(0);
        let written = scan
            .frames
            .iter()
            .filter_map(|f| match &f.entry {
                LogEntry::Write { record } => Some(record.id.clone()),
                LogEntry::Purge { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();

        info!(
            path = %path.display(),
            frames = scan.frames.len(),
            next_seq,
            "opened record log"
        );

        Ok(Self {
            file: open_append(&path)?,
            path,
            next_seq,
            committed_len: scan.committed_len,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop any bytes past the last committed frame.
    fn discard_uncommitted(&mut self) -> StorageResult<()> {
        let len = self.file.metadata()?.len();
        if len != self.committed_len {
            warn!(
                path = %self.path.display(),
                len,
                committed_len = self.committed_len,
                "discarding partial log entry"
            );
            self.file.set_len(self.committed_len)?;
        }
        Ok(())
    }
}

impl RecordLog for FileRecordLog {
    fn append(&mut self, entry: LogEntry) -> StorageResult<u64> {
        if let LogEntry::Write { record } = &entry {
            if self.written.contains(&record.id) {
                return Err(StorageError::DuplicateId {
                    id: record.id.to_string(),
                });
            }
        }

        let frame = LogFrame {
            seq: self.next_seq,
            entry,
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');

        self.discard_uncommitted()?;
        if let Err(e) = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.sync_data())
        {
            // Leftovers are retried by the next append if this fails too.
            if let Err(undo) = self.file.set_len(self.committed_len) {
                warn!(error = %undo, "failed to roll back partial log entry");
            }
            return Err(e.into());
        }
        self.committed_len += line.len() as u64;

        if let LogEntry::Write { record } = &frame.entry {
            self.written.insert(record.id.clone());
        }
        self.next_seq += 1;
        debug!(seq = frame.seq, id = %frame.entry.record_id(), "appended log frame");
        Ok(frame.seq)
    }

    fn frames(&self) -> StorageResult<Vec<LogFrame>> {
        Ok(scan(&self.path)?.frames)
    }

    fn compact(&mut self) -> StorageResult<CompactionStats> {
        let (kept, removed) = retain_unpurged(self.frames()?);
        if removed == 0 {
            return Ok(CompactionStats {
                frames_retained: kept.len(),
                frames_removed: 0,
            });
        }

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // Atomic rewrite: temp file in the same directory, then rename.
        let tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file());
            for frame in &kept {
                serde_json::to_writer(&mut out, frame)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        self.file = open_append(&self.path)?;
        self.committed_len = self.file.metadata()?.len();

        info!(
            path = %self.path.display(),
            retained = kept.len(),
            removed,
            "compacted record log"
        );
        Ok(CompactionStats {
            frames_retained: kept.len(),
            frames_removed: removed,
        })
    }

    fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Category, ContentHash, EmbeddingRef, MemoryRecord, TtlClass};
    use chrono::{TimeZone, Utc};

    fn record(id: &str, text: &str) -> MemoryRecord {
        let payload = serde_json::json!(text);
        MemoryRecord {
            id: RecordId::from(id),
            timestamp: Utc.timestamp_opt(1000, 0).unwrap(),
            category: Category::TaskState,
            importance: 0.5,
            source: "test".into(),
            embedding_ref: EmbeddingRef::from(id),
            content_hash: ContentHash::of_payload(&payload).unwrap(),
            payload,
            ttl_class: TtlClass::days(7),
            supersedes: None,
        }
    }

    fn make_log() -> (tempfile::TempDir, FileRecordLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRecordLog::open(dir.path().join("log").join("records.jsonl")).unwrap();
        (dir, log)
    }

    #[test]
    fn append_and_reopen() {
        let (dir, mut log) = make_log();
        log.append(LogEntry::Write {
            record: record("a", "alpha"),
        })
        .unwrap();
        log.append(LogEntry::Write {
            record: record("b", "beta"),
        })
        .unwrap();
        drop(log);

        let reopened = FileRecordLog::open(dir.path().join("log").join("records.jsonl")).unwrap();
        assert_eq!(reopened.next_seq(), 2);
        assert_eq!(reopened.frames().unwrap().len(), 2);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let (_dir, mut log) = make_log();
        log.append(LogEntry::Write {
            record: record("a", "alpha"),
        })
        .unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"seq":1,"op":"write","rec"#).unwrap();
        drop(f);

        let log = FileRecordLog::open(&path).unwrap();
        assert_eq!(log.frames().unwrap().len(), 1);
        assert_eq!(log.next_seq(), 1);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn partial_append_is_discarded_by_the_next_append() {
        let (_dir, mut log) = make_log();
        log.append(LogEntry::Write {
            record: record("a", "alpha"),
        })
        .unwrap();
        let path = log.path().to_path_buf();

        // What a failed write_all leaves behind while the log stays open.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"seq":1,"op":"write","rec"#).unwrap();
        drop(f);

        let seq = log
            .append(LogEntry::Write {
                record: record("b", "beta"),
            })
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(log.frames().unwrap().len(), 2);
        drop(log);

        let reopened = FileRecordLog::open(&path).unwrap();
        let frames = reopened.frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].entry.record_id(), &RecordId::from("b"));
        assert_eq!(reopened.next_seq(), 2);
    }

    #[test]
    fn corrupt_committed_line_is_an_error() {
        let (_dir, log) = make_log();
        let path = log.path().to_path_buf();
        drop(log);
        fs::write(&path, b"not json\n").unwrap();

        match FileRecordLog::open(&path) {
            Err(StorageError::CorruptEntry { line, .. }) => assert_eq!(line, 1),
            Err(other) => panic!("expected CorruptEntry, got {other:?}"),
            Ok(_) => panic!("expected CorruptEntry, got Ok"),
        }
    }

    #[test]
    fn compaction_drops_purged_payloads_but_keeps_tombstone() {
        let (_dir, mut log) = make_log();
        log.append(LogEntry::Write {
            record: record("a", "alpha"),
        })
        .unwrap();
        log.append(LogEntry::Write {
            record: record("b", "beta"),
        })
        .unwrap();
        let at = Utc.timestamp_opt(5000, 0).unwrap();
        log.append(LogEntry::Expire {
            id: RecordId::from("a"),
            at,
        })
        .unwrap();
        log.append(LogEntry::Purge {
            id: RecordId::from("a"),
            at,
        })
        .unwrap();

        let stats = log.compact().unwrap();
        assert_eq!(stats.frames_removed, 2);
        assert_eq!(stats.frames_retained, 2);

        // Appends keep working after the file is swapped.
        log.append(LogEntry::ClearStale {
            id: RecordId::from("b"),
        })
        .unwrap();
        let frames = log.frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.last().unwrap().seq, 4);

        // The purged id stays retired.
        let err = log
            .append(LogEntry::Write {
                record: record("a", "alpha again"),
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
    }
}
