//! Ingest pipeline: validate, deduplicate, and durably append.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use chronicle_state::{LogEntry, MemoryRecord, RecordId};

use crate::error::{MemoryError, MemoryResult, ValidationError};
use crate::obs;
use crate::snapshot::{dedup_key, ActiveSet};
use crate::store::MemoryStore;
use crate::validate::{validate, CandidateRecord};

/// What the caller wants when `(category, content_hash)` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Return the existing id; nothing is written
    #[default]
    Idempotent,
    /// Write a new record that supersedes the existing one
    Versioned,
    /// Fail with `Duplicate`
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Deduplicated,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub id: RecordId,
    pub outcome: WriteOutcome,
}

enum Decision {
    Write(WriteOutcome),
    Existing(RecordId),
}

fn decide(view: &ActiveSet, record: &mut MemoryRecord, mode: IngestMode) -> MemoryResult<Decision> {
    let mut outcome = WriteOutcome::Created;
    if let Some(existing) = view.dedup_lookup(&dedup_key(record)) {
        let existing_id = existing.record.id.clone();
        match mode {
            IngestMode::Idempotent => return Ok(Decision::Existing(existing_id)),
            IngestMode::Strict => {
                return Err(MemoryError::Duplicate {
                    id: existing_id,
                    category: record.category,
                })
            }
            IngestMode::Versioned => {
                if let Some(requested) = &record.supersedes {
                    if *requested != existing_id {
                        return Err(ValidationError::ConflictingSupersedes {
                            requested: requested.clone(),
                            owner: existing_id,
                        }
                        .into());
                    }
                }
                record.supersedes = Some(existing_id);
            }
        }
    }
    if let Some(target) = &record.supersedes {
        if !view.is_active(target) {
            return Err(MemoryError::NotFound { id: target.clone() });
        }
        outcome = WriteOutcome::Superseded;
    }
    Ok(Decision::Write(outcome))
}

impl MemoryStore {
    /// Validate and ingest a candidate.
    ///
    /// Writes to the same `(category, content_hash)` are serialized so the
    /// dedup check and the append happen as one step. The record is either
    /// fully durable and visible, or not visible at all. The capacity limit
    /// only applies once dedup has decided a new record is needed.
    #[instrument(skip_all, fields(mode = ?mode))]
    pub async fn write(
        &self,
        candidate: CandidateRecord,
        mode: IngestMode,
    ) -> MemoryResult<WriteReceipt> {
        let mut record = validate(candidate, &self.config.retention)?;
        let requested = record.supersedes.clone();
        let key = dedup_key(&record);
        let mut remediated = false;

        loop {
            let claim = self.key_locks.acquire(&key).await;
            let view = self.snapshot().await;
            record.supersedes = requested.clone();
            let outcome = match decide(&view, &mut record, mode)? {
                Decision::Existing(id) => {
                    obs::emit_record_deduplicated(&id, record.category);
                    return Ok(WriteReceipt {
                        id,
                        outcome: WriteOutcome::Deduplicated,
                    });
                }
                Decision::Write(outcome) => outcome,
            };

            if let Some(limit) = self.config.capacity.soft_limit_records {
                let held = view.held();
                if held >= limit {
                    if remediated {
                        return Err(MemoryError::CapacityExceeded {
                            limit,
                            current: held,
                        });
                    }
                    // Prune claims keys itself; release ours, then decide again.
                    drop(claim);
                    self.remediate_capacity(&view, limit).await?;
                    remediated = true;
                    continue;
                }
            }

            // The supersedes target may have been expired since `view` was taken.
            let supersedes = record.supersedes.clone();
            let id = record.id.clone();
            let source = record.source.clone();
            let timestamp = record.timestamp;
            let category = record.category;
            let content_hash = record.content_hash.clone();

            self.commit_if(LogEntry::Write { record }, |current| match &supersedes {
                Some(target) if !current.is_active(target) => {
                    Err(MemoryError::NotFound { id: target.clone() })
                }
                _ => Ok(true),
            })
            .await?;
            drop(claim);

            self.observe_source_clock(&source, timestamp).await;
            obs::emit_record_ingested(&id, category, &content_hash, outcome);
            return Ok(WriteReceipt { id, outcome });
        }
    }

    /// Warn when a source's timestamps regress within this session.
    async fn observe_source_clock(&self, source: &str, timestamp: chrono::DateTime<chrono::Utc>) {
        let mut sources = self.sources.lock().await;
        match sources.get_mut(source) {
            Some(last) if timestamp < *last => {
                warn!(
                    source,
                    last = %last,
                    timestamp = %timestamp,
                    "source timestamp regressed"
                );
            }
            Some(last) => *last = timestamp,
            None => {
                sources.insert(source.to_string(), timestamp);
            }
        }
    }

    /// Over the soft limit, run one retention pass at the logical clock.
    async fn remediate_capacity(&self, view: &ActiveSet, limit: usize) -> MemoryResult<()> {
        if let Some(now) = view.high_water() {
            obs::emit_capacity_remediation(view.held(), limit);
            self.prune(now).await?;
        }
        Ok(())
    }
}
