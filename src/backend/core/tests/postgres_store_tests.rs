//! Integration tests for the PostgreSQL event store.
//!
//! These need a database and are skipped unless `STRAND_TEST_DATABASE_URL` is
//! set. Every test truncates the `events` table, so point it at a scratch
//! database and run with `--test-threads=1`.

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::Barrier;

use strand_core::config::StoreConfig;
use strand_core::db::{Database, MIGRATOR};
use strand_core::error::{ErrorCode, StrandError};
use strand_core::events::{
    AggregateId, EventMetadata, EventStore, NewEvent, PgEventStore,
};

// ============================================================================
// Test Utilities
// ============================================================================

async fn store() -> Option<PgEventStore> {
    let Ok(url) = std::env::var("STRAND_TEST_DATABASE_URL") else {
        eprintln!("STRAND_TEST_DATABASE_URL not set; skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    sqlx::query("TRUNCATE events RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();
    Some(Database::from_pool(pool).event_store(&StoreConfig::default()))
}

fn event(aggregate_id: AggregateId, event_type: &str) -> NewEvent {
    NewEvent::new(
        event_type,
        aggregate_id,
        "Agent",
        json!({ "marker": event_type }),
        EventMetadata::new("pg-tests").with_correlation("corr-pg"),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_append_and_read_back() {
    let Some(store) = store().await else { return };
    let id = AggregateId::new();

    let stored = store
        .append(vec![event(id, "A"), event(id, "B")], None)
        .await
        .unwrap();
    assert_eq!(stored.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);

    store.append(vec![event(id, "C")], Some(2)).await.unwrap();

    let history = store.get_events(id, None).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].metadata.correlation_id, "corr-pg");
    assert_eq!(history[2].payload, json!({ "marker": "C" }));

    let tail = store.get_events(id, Some(2)).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].event_type, "C");
}

#[tokio::test]
async fn test_stale_append_conflicts_and_writes_nothing() {
    let Some(store) = store().await else { return };
    let id = AggregateId::new();
    store.append(vec![event(id, "A")], None).await.unwrap();
    let before = store.get_last_position().await.unwrap();

    let err = store
        .append(vec![event(id, "B"), event(id, "C")], Some(0))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
    assert_eq!(err.details().actual_version, Some(1));
    assert_eq!(store.get_events(id, None).await.unwrap().len(), 1);
    assert_eq!(store.get_last_position().await.unwrap(), before);
}

#[tokio::test]
async fn test_duplicate_event_id_is_rejected() {
    let Some(store) = store().await else { return };
    let original = event(AggregateId::new(), "A");
    store.append(vec![original.clone()], None).await.unwrap();

    let mut copy = original;
    copy.aggregate_id = AggregateId::new();
    let err = store.append(vec![copy], None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateEvent);
}

#[tokio::test]
async fn test_version_constraint_maps_to_conflict() {
    let Some(store) = store().await else { return };
    let id = AggregateId::new();
    store.append(vec![event(id, "A")], None).await.unwrap();

    // Bypass the advisory lock and version check entirely.
    let err = sqlx::query(
        "INSERT INTO events (id, type, aggregate_id, aggregate_type, version, payload, metadata) \
         VALUES ($1, 'B', $2, 'Agent', 1, '{}', '{}')",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(id.0)
    .execute(store.pool())
    .await
    .unwrap_err();

    let err = StrandError::from(err);
    assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
    assert_eq!(store.get_events(id, None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_have_exactly_one_winner() {
    const WRITERS: usize = 6;

    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let id = AggregateId::new();
    store.append(vec![event(id, "Created")], None).await.unwrap();

    let barrier = Arc::new(Barrier::new(WRITERS));
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            store
                .append(vec![event(id, &format!("Racer{}", i))], Some(1))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e.code(), ErrorCode::ConcurrencyConflict),
        }
    }
    assert_eq!(winners, 1);

    let versions: Vec<_> = store
        .get_events(id, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
async fn test_log_wide_reads_are_position_ordered() {
    let Some(store) = store().await else { return };
    for _ in 0..3 {
        let id = AggregateId::new();
        store
            .append(vec![event(id, "Opened"), event(id, "Closed")], None)
            .await
            .unwrap();
    }

    let all = store.get_all_events(None).await.unwrap();
    assert_eq!(all.len(), 6);
    assert!(all.windows(2).all(|w| w[0].position < w[1].position));

    let opened = store.get_events_by_type("Opened", None).await.unwrap();
    assert_eq!(opened.len(), 3);
    let after_first = store
        .get_events_by_type("Opened", Some(opened[0].position))
        .await
        .unwrap();
    assert_eq!(after_first.len(), 2);

    assert_eq!(
        store.get_last_position().await.unwrap(),
        all.last().unwrap().position
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crossed_batches_on_shared_lock_keys_both_commit() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);

    // `k` and `k << 32` fold to the same lock key, so each batch below holds
    // one aggregate from each key.
    for round in 0..20u128 {
        let k = 2 * round + 10;
        let a = AggregateId(uuid::Uuid::from_u128(k));
        let b = AggregateId(uuid::Uuid::from_u128(k << 32));
        let c = AggregateId(uuid::Uuid::from_u128(k + 1));
        let d = AggregateId(uuid::Uuid::from_u128((k + 1) << 32));

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for (first, second) in [(a, d), (c, b)] {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store
                    .append(vec![event(first, "Created"), event(second, "Created")], None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    assert_eq!(store.get_all_events(None).await.unwrap().len(), 80);
}
