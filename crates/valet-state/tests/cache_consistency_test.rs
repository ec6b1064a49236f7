// Integration tests for two-tier cache consistency
//
// These tests verify the load-bearing properties of the cache: the L1 size
// bound under key churn, write-through merge semantics measured in actual
// L2 traffic, failure isolation between the tiers, and safety under
// concurrent writers.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use valet_state::{DocumentStore, InMemoryDocumentStore, StateCache};

const TTL: Duration = Duration::from_secs(300);

// =============================================================================
// Size bound
// =============================================================================

#[tokio::test]
async fn bounded_size_under_distinct_key_churn() {
    let cache = StateCache::with_max_entries(InMemoryDocumentStore::new(), 100);

    for i in 0..500 {
        cache
            .set("sessions", &format!("u{i}"), json!({"seq": i}), TTL, false)
            .await
            .unwrap();
    }

    assert_eq!(cache.len(), 100);
    // The newest keys survived FIFO eviction.
    assert_eq!(
        cache.get("sessions", "u499", TTL).await,
        Some(json!({"seq": 499}))
    );
}

// =============================================================================
// Write-through merge
// =============================================================================

#[tokio::test]
async fn merging_sets_need_no_intervening_reads() {
    let store = InMemoryDocumentStore::new();
    let cache = StateCache::new(store.clone());

    cache
        .set("sessions", "u1", json!({"a": 1}), TTL, true)
        .await
        .unwrap();
    cache
        .set("sessions", "u1", json!({"b": 2}), TTL, true)
        .await
        .unwrap();

    // The merged record comes straight from L1.
    assert_eq!(
        cache.get("sessions", "u1", TTL).await,
        Some(json!({"a": 1, "b": 2}))
    );
    assert_eq!(store.read_count(), 0);

    // Both deltas reached the durable store, merged there as well.
    assert_eq!(store.write_count(), 2);
    assert_eq!(
        store.get_document("sessions", "u1").await.unwrap(),
        Some(json!({"a": 1, "b": 2}))
    );
}

#[tokio::test]
async fn durable_store_remains_authoritative_across_instances() {
    let store = InMemoryDocumentStore::new();
    let writer = StateCache::new(store.clone());

    writer
        .set("sessions", "u1", json!({"tier": "pro", "lang": "en"}), TTL, true)
        .await
        .unwrap();

    // A second cache over the same store (fresh L1) reads through.
    let reader = StateCache::new(store.clone());
    assert_eq!(
        reader.get("sessions", "u1", TTL).await,
        Some(json!({"tier": "pro", "lang": "en"}))
    );
}

// =============================================================================
// Failure isolation between tiers
// =============================================================================

#[tokio::test]
async fn failed_durable_write_propagates_and_preserves_l1() {
    let store = InMemoryDocumentStore::new();
    let cache = StateCache::new(store.clone());

    cache
        .set("sessions", "u1", json!({"count": 1}), TTL, true)
        .await
        .unwrap();

    store.set_fail_writes(true);
    assert!(cache
        .set("sessions", "u1", json!({"count": 2}), TTL, true)
        .await
        .is_err());

    // Neither tier saw the failed update.
    assert_eq!(
        cache.get("sessions", "u1", TTL).await,
        Some(json!({"count": 1}))
    );
    store.set_fail_writes(false);
    assert_eq!(
        store.get_document("sessions", "u1").await.unwrap(),
        Some(json!({"count": 1}))
    );
}

#[tokio::test]
async fn read_failures_do_not_poison_later_reads() {
    let store = InMemoryDocumentStore::new();
    let cache = StateCache::new(store.clone());
    store.seed("sessions", "u1", json!({"tier": "free"})).await;

    store.set_fail_reads(true);
    assert_eq!(cache.get("sessions", "u1", TTL).await, None);
    assert_eq!(cache.get("sessions", "u1", TTL).await, None);

    store.set_fail_reads(false);
    assert_eq!(
        cache.get("sessions", "u1", TTL).await,
        Some(json!({"tier": "free"}))
    );
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn concurrent_writers_lose_no_entries() {
    let cache = Arc::new(StateCache::with_max_entries(
        InMemoryDocumentStore::new(),
        1000,
    ));

    let mut handles = Vec::new();
    for writer in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                cache
                    .set(
                        "sessions",
                        &format!("w{writer}-k{i}"),
                        json!({"writer": writer, "seq": i}),
                        TTL,
                        false,
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 1000 distinct keys exactly fill the bound; nothing was lost or
    // corrupted.
    assert_eq!(cache.len(), 1000);
    for writer in 0..10 {
        for i in 0..100 {
            let value = cache
                .get("sessions", &format!("w{writer}-k{i}"), TTL)
                .await
                .unwrap_or_else(|| panic!("lost entry w{writer}-k{i}"));
            assert_eq!(value, json!({"writer": writer, "seq": i}));
        }
    }
}

#[tokio::test]
async fn concurrent_churn_respects_the_bound() {
    let cache = Arc::new(StateCache::with_max_entries(
        InMemoryDocumentStore::new(),
        50,
    ));

    let mut handles = Vec::new();
    for writer in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                cache
                    .set(
                        "sessions",
                        &format!("w{writer}-k{i}"),
                        json!({"seq": i}),
                        TTL,
                        false,
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(cache.len() <= 50);
}

// =============================================================================
// Staleness window and invalidation
// =============================================================================

#[tokio::test]
async fn external_write_visible_after_invalidate() {
    let store = InMemoryDocumentStore::new();
    let cache = StateCache::new(store.clone());
    store.seed("users", "u1", json!({"tier": "free"})).await;

    assert_eq!(
        cache.get("users", "u1", TTL).await,
        Some(json!({"tier": "free"}))
    );

    // Another process upgrades the user directly in the durable store.
    store
        .set_document("users", "u1", json!({"tier": "pro"}), true)
        .await
        .unwrap();

    // Stale until invalidated; bounded by the TTL in the worst case.
    assert_eq!(
        cache.get("users", "u1", TTL).await,
        Some(json!({"tier": "free"}))
    );

    cache.invalidate("users", "u1");
    assert_eq!(
        cache.get("users", "u1", TTL).await,
        Some(json!({"tier": "pro"}))
    );
}

#[tokio::test]
async fn deleted_document_reads_absent_after_invalidate() {
    let store = InMemoryDocumentStore::new();
    let cache = StateCache::new(store.clone());
    store.seed("users", "u1", json!({"tier": "free"})).await;
    cache.get("users", "u1", TTL).await;

    store.delete_document("users", "u1").await.unwrap();
    cache.invalidate("users", "u1");

    assert_eq!(cache.get("users", "u1", TTL).await, None);
}
