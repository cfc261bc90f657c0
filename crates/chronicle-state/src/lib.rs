//! Chronicle-State: persistence layer for the Chronicle memory store
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only durability, crash recovery, and a stable record
//! schema from which the active set and its aggregate hash can be
//! recomputed.
//!
//! ## Key Components
//!
//! - `MemoryRecord`: immutable record schema (id, timestamp, category, ...)
//! - `LogEntry` / `LogFrame`: one durable entry per lifecycle change
//! - `RecordLog`: storage trait; `FileRecordLog` (JSON lines) and
//!   `fakes::MemoryRecordLog`

pub mod digest;
mod error;
pub mod fakes;
mod file_log;
pub mod log;
pub mod schema;

pub use digest::{canonical_json, payload_digest};
pub use error::{StorageError, StorageResult};
pub use file_log::FileRecordLog;
pub use log::{CompactionStats, RecordLog};
pub use schema::{
    Category, ContentHash, EmbeddingRef, LogEntry, LogFrame, MemoryRecord, RecordId, TtlClass,
    UnknownCategory, SECONDS_PER_DAY,
};
