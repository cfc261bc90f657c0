//! End-to-end behaviour of ingest, query, prune and check.

mod common;

use chrono::Duration;

use chronicle_core::fakes::ScriptedIndex;
use chronicle_core::{
    Category, DecayParams, IngestMode, MemoryError, MemoryQuery, MemoryStore, Neighbor,
    PruneStats, StoreConfig, ValidationError, WriteOutcome,
};
use common::{at, candidate, Harness, DAY, WEEK};

// ===========================================================================
// Worked scenarios
// ===========================================================================

#[tokio::test]
async fn task_state_visible_until_ttl_then_pruned() {
    let h = Harness::new(StoreConfig::default());
    let id = h
        .ingest(
            candidate(1_000, "task_state", "build passed").with_importance(0.8),
            vec![1.0, 0.0],
        )
        .await;

    let before = MemoryQuery::new(vec![1.0, 0.0], at(1_000 + 604_799))
        .with_category(Category::TaskState);
    let hits = h.store.query(&before).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, id);

    let now = at(1_000 + 604_801);
    let stats = h.store.prune(now).await.unwrap();
    assert_eq!(stats.expired_count, 1);

    let after = MemoryQuery::new(vec![1.0, 0.0], now).with_category(Category::TaskState);
    assert!(h.store.query(&after).await.unwrap().is_empty());
}

#[tokio::test]
async fn recent_record_outranks_old_one_at_equal_similarity() {
    let index = std::sync::Arc::new(ScriptedIndex::default());
    let store = MemoryStore::in_memory(StoreConfig::default(), index.clone()).unwrap();
    let now = 10 * DAY;

    let a = store
        .write(candidate(now - 3_600, "general", "recent"), IngestMode::Idempotent)
        .await
        .unwrap()
        .id;
    let b = store
        .write(candidate(now - 360_000, "general", "old"), IngestMode::Idempotent)
        .await
        .unwrap()
        .id;
    index.set_hits(vec![Neighbor::new(b.clone(), 0.9), Neighbor::new(a.clone(), 0.9)]);

    let decay = DecayParams {
        alpha: 1.0,
        beta: 0.0,
        tau_seconds: 36_000.0,
        max_decay_ratio: 50.0,
    };
    let q = MemoryQuery::new(vec![1.0], at(now)).with_decay(decay);
    let hits = store.query(&q).await.unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, a);
    assert_eq!(hits[1].record.id, b);
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn out_of_range_importance_is_rejected_without_side_effects() {
    let h = Harness::new(StoreConfig::default());
    let before = h.store.stats().await;

    let err = h
        .store
        .write(
            candidate(1_000, "workflow", "too important").with_importance(1.5),
            IngestMode::Idempotent,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Validation(ValidationError::ImportanceOutOfRange(v)) if v == 1.5
    ));

    assert_eq!(h.store.stats().await, before);
    let q = MemoryQuery::new(vec![1.0, 0.0], at(2_000));
    assert!(h.store.query(&q).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_top_k_is_a_validation_error() {
    let h = Harness::new(StoreConfig::default());
    h.ingest(candidate(1_000, "workflow", "deploy"), vec![1.0, 0.0])
        .await;

    let q = MemoryQuery::new(vec![1.0, 0.0], at(2_000)).with_top_k(0);
    let err = h.store.query(&q).await.unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Validation(ValidationError::ZeroTopK)
    ));
}

#[tokio::test]
async fn check_reports_stale_until_caller_adopts_current_hash() {
    let h = Harness::new(StoreConfig::default());
    let expected = h.store.stats().await.state_hash;

    h.ingest(candidate(1_000, "architecture", "use a WAL"), vec![0.0, 1.0])
        .await;

    let report = h.store.check(&expected).await;
    assert!(report.stale);
    assert_ne!(report.current_hash, expected);

    let again = h.store.check(&report.current_hash).await;
    assert!(!again.stale);
}

// ===========================================================================
// Properties
// ===========================================================================

#[tokio::test]
async fn ttl_boundary_is_inclusive_for_queries() {
    let h = Harness::new(StoreConfig::default());
    h.ingest(candidate(0, "task_state", "lint fixed"), vec![1.0])
        .await;

    for offset in [0, 1, WEEK / 2, WEEK - 1] {
        let q = MemoryQuery::new(vec![1.0], at(offset));
        assert_eq!(h.store.query(&q).await.unwrap().len(), 1, "now = {offset}");
    }
    for offset in [WEEK, WEEK + 1, 10 * WEEK] {
        let q = MemoryQuery::new(vec![1.0], at(offset));
        assert!(h.store.query(&q).await.unwrap().is_empty(), "now = {offset}");
    }
}

#[tokio::test]
async fn never_expiring_categories_survive_any_number_of_prunes() {
    let h = Harness::new(StoreConfig::default());
    let id = h
        .ingest(candidate(0, "user_preferences", "prefers tabs"), vec![1.0])
        .await;

    for year in 1..=20 {
        let stats = h.store.prune(at(year * 365 * DAY)).await.unwrap();
        assert_eq!(stats, PruneStats::default());
    }
    assert_eq!(h.store.get(&id).await.unwrap().id, id);
}

#[tokio::test]
async fn second_prune_at_same_instant_is_a_noop() {
    let h = Harness::new(StoreConfig::default());
    h.ingest(candidate(0, "task_state", "one"), vec![1.0]).await;
    h.ingest(candidate(10, "task_state", "two"), vec![1.0]).await;
    h.ingest(candidate(10, "workflow", "three"), vec![1.0]).await;

    let first = h.store.prune(at(2 * WEEK)).await.unwrap();
    assert_eq!(first.expired_count, 2);
    assert_eq!(first.purged_count, 2);

    let second = h.store.prune(at(2 * WEEK)).await.unwrap();
    assert_eq!(second, PruneStats::default());
}

#[tokio::test]
async fn idempotent_ingest_returns_the_same_id() {
    let h = Harness::new(StoreConfig::default());
    let first = h
        .store
        .write(candidate(1_000, "workflow", "run tests first"), IngestMode::Idempotent)
        .await
        .unwrap();
    let second = h
        .store
        .write(candidate(2_000, "workflow", "run tests first"), IngestMode::Idempotent)
        .await
        .unwrap();

    assert_eq!(first.outcome, WriteOutcome::Created);
    assert_eq!(second.outcome, WriteOutcome::Deduplicated);
    assert_eq!(first.id, second.id);
    assert_eq!(h.store.stats().await.active, 1);
}

#[tokio::test]
async fn same_payload_in_another_category_is_a_new_record() {
    let h = Harness::new(StoreConfig::default());
    let a = h.ingest(candidate(1_000, "workflow", "same"), vec![1.0]).await;
    let b = h.ingest(candidate(1_000, "evaluation", "same"), vec![1.0]).await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn category_filter_round_trip() {
    let h = Harness::new(StoreConfig::default());
    h.ingest(candidate(100, "workflow", "w1"), vec![1.0, 0.0]).await;
    h.ingest(candidate(200, "workflow", "w2"), vec![0.9, 0.1]).await;
    h.ingest(candidate(300, "evaluation", "e1"), vec![1.0, 0.0]).await;

    let q = MemoryQuery::new(vec![1.0, 0.0], at(1_000)).with_category(Category::Workflow);
    let hits = h.store.query(&q).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|r| r.record.category == Category::Workflow));
}

#[tokio::test]
async fn time_window_round_trip() {
    let h = Harness::new(StoreConfig::default());
    let now = 100 * DAY;
    h.ingest(candidate(now - 36_000, "general", "ten hours ago"), vec![1.0])
        .await;
    let recent = h
        .ingest(candidate(now - 3_600, "general", "an hour ago"), vec![1.0])
        .await;
    h.ingest(candidate(now - 7_200, "general", "exactly at the edge"), vec![1.0])
        .await;

    let window = Duration::hours(2);
    let q = MemoryQuery::new(vec![1.0], at(now)).with_time_window(window);
    let hits = h.store.query(&q).await.unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, recent);
    assert!(hits
        .iter()
        .all(|r| at(now).signed_duration_since(r.record.timestamp) <= window));
}

#[tokio::test]
async fn top_k_bounds_the_result_count() {
    let h = Harness::new(StoreConfig::default());
    for i in 0..10 {
        h.ingest(candidate(i, "general", &format!("note {i}")), vec![1.0, i as f32])
            .await;
    }
    let q = MemoryQuery::new(vec![1.0, 0.0], at(100)).with_top_k(3);
    let hits = h.store.query(&q).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn empty_store_query_returns_empty_list() {
    let h = Harness::new(StoreConfig::default());
    let q = MemoryQuery::new(vec![1.0], at(0));
    assert!(h.store.query(&q).await.unwrap().is_empty());
}
