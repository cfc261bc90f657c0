//! Shared fixtures for chronicle-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use chronicle_core::fakes::ExactIndex;
use chronicle_core::{CandidateRecord, IngestMode, MemoryStore, RecordId, StoreConfig};

pub const DAY: i64 = 86_400;
pub const WEEK: i64 = 7 * DAY;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn candidate(secs: i64, category: &str, text: &str) -> CandidateRecord {
    CandidateRecord::new(at(secs), category, json!({ "text": text }))
        .with_source("agent")
        .with_embedding_ref(format!("emb:{text}"))
}

/// A store wired to an exact cosine index the tests can populate.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub index: ExactIndex,
}

impl Harness {
    pub fn new(config: StoreConfig) -> Self {
        let index = ExactIndex::new();
        let store = MemoryStore::in_memory(config, Arc::new(index.clone())).unwrap();
        Self {
            store: Arc::new(store),
            index,
        }
    }

    /// Write in idempotent mode and register the vector under the returned id.
    pub async fn ingest(&self, candidate: CandidateRecord, vector: Vec<f32>) -> RecordId {
        let receipt = self
            .store
            .write(candidate, IngestMode::Idempotent)
            .await
            .unwrap();
        self.index.insert(receipt.id.clone(), vector);
        receipt.id
    }
}
