//! Record schema persisted by the append-only log.
//!
//! `MemoryRecord` is immutable once written. Lifecycle changes (expiry,
//! purge, stale flags) are expressed as additional `LogEntry` frames that
//! reference a record by id, never as rewrites of the record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::digest::payload_digest;
use crate::error::StorageResult;

/// Unique, never-reused record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a new random RecordId
    pub fn generate() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// Closed set of retention classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TaskState,
    UserPreferences,
    Architecture,
    Workflow,
    Evaluation,
    General,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::TaskState,
        Category::UserPreferences,
        Category::Architecture,
        Category::Workflow,
        Category::Evaluation,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskState => "task_state",
            Self::UserPreferences => "user_preferences",
            Self::Architecture => "architecture",
            Self::Workflow => "workflow",
            Self::Evaluation => "evaluation",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Retention class stamped on a record from its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TtlClass {
    Never,
    After { seconds: u64 },
}

pub const SECONDS_PER_DAY: u64 = 86_400;

impl TtlClass {
    /// Lifetime of `days` days, saturating at `u64::MAX` seconds.
    pub fn days(days: u64) -> Self {
        TtlClass::After {
            seconds: days.saturating_mul(SECONDS_PER_DAY),
        }
    }

    /// Finite lifetime, or `None` for records that never expire.
    ///
    /// Lifetimes beyond chrono's representable range behave as `Never`.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            TtlClass::Never => None,
            TtlClass::After { seconds } => {
                chrono::Duration::try_seconds(i64::try_from(*seconds).ok()?)
            }
        }
    }

    /// True when a record stamped at `timestamp` has outlived this class at `now`.
    ///
    /// Expiry is inclusive: a record is live for `now < timestamp + ttl`.
    pub fn is_elapsed(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.duration() {
            None => false,
            Some(ttl) => match timestamp.checked_add_signed(ttl) {
                Some(deadline) => now >= deadline,
                None => false,
            },
        }
    }
}

/// SHA-256 hex digest of a record payload's canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_payload(payload: &serde_json::Value) -> StorageResult<Self> {
        Ok(ContentHash(payload_digest(payload)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle into the external similarity index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingRef(pub String);

impl EmbeddingRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EmbeddingRef {
    fn from(s: &str) -> Self {
        EmbeddingRef(s.to_string())
    }
}

/// A validated, durable memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,
    /// Creation time on the logical clock
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    /// Caller-assigned priority in [0, 1]
    pub importance: f64,
    /// Which collaborator produced the artifact
    pub source: String,
    pub embedding_ref: EmbeddingRef,
    pub payload: serde_json::Value,
    pub content_hash: ContentHash,
    pub ttl_class: TtlClass,
    /// Earlier record this one replaces, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<RecordId>,
}

impl MemoryRecord {
    /// Re-hash the payload and compare against the stored `content_hash`.
    pub fn verify_content_hash(&self) -> bool {
        ContentHash::of_payload(&self.payload)
            .map(|fresh| fresh == self.content_hash)
            .unwrap_or(false)
    }

    /// Age of the record at `now`, clamped at zero for future-dated records.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        let age = now.signed_duration_since(self.timestamp);
        if age < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            age
        }
    }
}

/// One durable entry in the append-only record log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogEntry {
    /// A new record entered the active set
    Write { record: MemoryRecord },
    /// Record left the active set after its TTL elapsed
    Expire { id: RecordId, at: DateTime<Utc> },
    /// Payload physically removed; the id stays retired
    Purge { id: RecordId, at: DateTime<Utc> },
    /// A cached derivative of this record no longer matches
    FlagStale {
        id: RecordId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint: Option<String>,
    },
    ClearStale { id: RecordId },
}

impl LogEntry {
    /// Id of the record this entry concerns.
    pub fn record_id(&self) -> &RecordId {
        match self {
            LogEntry::Write { record } => &record.id,
            LogEntry::Expire { id, .. }
            | LogEntry::Purge { id, .. }
            | LogEntry::FlagStale { id, .. }
            | LogEntry::ClearStale { id } => id,
        }
    }
}

/// A log entry with its monotonic sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: LogEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_category_parse_roundtrip() {
        for cat in Category::ALL {
            assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
        }
        assert!("scratchpad".parse::<Category>().is_err());
    }

    #[test]
    fn test_ttl_boundary_is_inclusive() {
        let ttl = TtlClass::After { seconds: 604_800 };
        assert!(!ttl.is_elapsed(at(1000), at(1000 + 604_799)));
        assert!(ttl.is_elapsed(at(1000), at(1000 + 604_800)));
        assert!(ttl.is_elapsed(at(1000), at(1000 + 604_801)));
    }

    #[test]
    fn test_never_ttl_never_elapses() {
        assert!(!TtlClass::Never.is_elapsed(at(0), at(i32::MAX as i64)));
    }

    #[test]
    fn test_log_frame_wire_shape() {
        let frame = LogFrame {
            seq: 3,
            entry: LogEntry::Expire {
                id: RecordId::from("r1"),
                at: at(10),
            },
        };
        let line = serde_json::to_value(&frame).unwrap();
        assert_eq!(line["op"], "expire");
        assert_eq!(line["seq"], 3);
        assert_eq!(line["id"], "r1");
    }
}
