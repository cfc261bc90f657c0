//! Chronicle Core: long-term memory for agents
//!
//! Timestamped, importance-weighted records grouped by category, ranked by a
//! decay-aware score, expired by per-category TTLs, and checked for drift
//! with content-addressed aggregate hashes.
//!
//! ## Layer 1 - Domain
//!
//! - [`MemoryStore`]: ingest, query, prune, staleness checks
//! - [`scorer`]: `sim + α·exp(-age/τ) + β·importance`
//! - [`SimilarityIndex`]: the external nearest-neighbor boundary
//! - [`obs`] / [`telemetry`]: structured events and subscriber setup
//!
//! Persistence lives in `chronicle-state`.

pub mod config;
pub mod error;
pub mod fakes;
pub mod index;
pub mod ingest;
pub(crate) mod locks;
pub mod obs;
pub mod query;
pub mod retention;
pub mod scorer;
pub mod snapshot;
pub mod staleness;
pub mod store;
pub mod telemetry;
pub mod validate;

pub use config::{
    CapacityConfig, QueryDefaults, RetentionTable, SimilarityConvention, StoreConfig,
};
pub use error::{MemoryError, MemoryResult, ValidationError};
pub use index::{IndexError, Neighbor, SimilarityIndex};
pub use ingest::{IngestMode, WriteOutcome, WriteReceipt};
pub use query::{MemoryQuery, ScoredRecord};
pub use retention::PruneStats;
pub use scorer::{score, DecayParams};
pub use snapshot::{ActiveSet, RecordSlot, RecordStatus};
pub use staleness::{
    aggregate_hash, IntegrityReport, ReconcileReport, StateHash, StalenessReport,
    SummaryCheckpoint,
};
pub use store::{MemoryStore, StoreStats};
pub use validate::{validate, CandidateRecord, DEFAULT_IMPORTANCE};

pub use chronicle_state::{
    Category, ContentHash, EmbeddingRef, MemoryRecord, RecordId, TtlClass,
};
