//! Redis store tests.
//!
//! These need a live Redis and are skipped unless `TOKENGATE_TEST_REDIS_URL`
//! is set, e.g. `TOKENGATE_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test`.
//! Each test writes under its own random key prefix.

mod common;

use common::{at, policy};
use std::sync::Arc;
use tokengate::config::StoreConfig;
use tokengate::degradation::DegradationPolicy;
use tokengate::engine::{BudgetError, ReservationEngine};
use tokengate::scope::{build_scopes, ScopeKey, Window};
use tokengate::store::{CounterStore, RedisStore, ReserveOutcome, ResolveOutcome, ScopeCounters};

fn redis_store() -> Option<Arc<RedisStore>> {
    let url = std::env::var("TOKENGATE_TEST_REDIS_URL").ok()?;
    let config = StoreConfig {
        url,
        key_prefix: format!("tokengate-test:{}:", uuid::Uuid::new_v4()),
        timeout_ms: 2000,
        ..StoreConfig::default()
    };
    Some(Arc::new(RedisStore::new(&config).unwrap()))
}

fn scopes(user: &str) -> Vec<ScopeKey> {
    build_scopes(
        "acme",
        user,
        "openai",
        "gpt-4o",
        &[Window::PerDay],
        at(2026, 2, 20, 12, 0, 0),
    )
    .unwrap()
}

#[tokio::test]
async fn test_redis_reserve_commit_release() {
    let Some(store) = redis_store() else {
        return;
    };
    store.ping().await.unwrap();
    let scopes = scopes("alice");
    let limits = vec![Some(1000); scopes.len()];

    let outcome = store.reserve("r1", &scopes, &limits, 300).await.unwrap();
    assert_eq!(outcome, ReserveOutcome::Reserved);
    let outcome = store.reserve("r2", &scopes, &limits, 200).await.unwrap();
    assert_eq!(outcome, ReserveOutcome::Reserved);

    // Commit subtracts the recorded hold, not the actual
    let resolved = store.commit("r1", 350).await.unwrap();
    assert_eq!(resolved, ResolveOutcome::Resolved { held: 300 });
    let resolved = store.release("r2").await.unwrap();
    assert_eq!(resolved, ResolveOutcome::Resolved { held: 200 });

    for counters in store.counters(&scopes).await.unwrap() {
        assert_eq!(counters, ScopeCounters { reserved: 0, used: 350 });
    }
}

#[tokio::test]
async fn test_redis_second_resolve_is_not_found() {
    let Some(store) = redis_store() else {
        return;
    };
    let scopes = scopes("alice");
    let limits = vec![None; scopes.len()];

    store.reserve("r1", &scopes, &limits, 100).await.unwrap();
    store.commit("r1", 100).await.unwrap();

    assert_eq!(
        store.commit("r1", 100).await.unwrap(),
        ResolveOutcome::NotFound
    );
    assert_eq!(
        store.release("r1").await.unwrap(),
        ResolveOutcome::NotFound
    );
    for counters in store.counters(&scopes).await.unwrap() {
        assert_eq!(counters, ScopeCounters { reserved: 0, used: 100 });
    }
}

#[tokio::test]
async fn test_redis_resolve_uses_recorded_counters() {
    let Some(store) = redis_store() else {
        return;
    };
    let alice = scopes("alice");
    let bob = scopes("bob");
    let limits = vec![None; alice.len()];

    store.reserve("r1", &alice, &limits, 40).await.unwrap();
    store.reserve("r2", &bob, &limits, 10).await.unwrap();
    store.commit("r1", 35).await.unwrap();

    // Only the user scope differs between the two requests
    let alice_user = store.counters(&alice[2..3]).await.unwrap();
    let bob_user = store.counters(&bob[2..3]).await.unwrap();
    assert_eq!(alice_user[0], ScopeCounters { reserved: 0, used: 35 });
    assert_eq!(bob_user[0], ScopeCounters { reserved: 10, used: 0 });
}

#[tokio::test]
async fn test_redis_reserve_is_all_or_nothing() {
    let Some(store) = redis_store() else {
        return;
    };
    let scopes = scopes("alice");
    // Only the user scope (index 2) is tight
    let mut limits = vec![Some(1000); scopes.len()];
    limits[2] = Some(50);

    match store.reserve("r1", &scopes, &limits, 60).await.unwrap() {
        ReserveOutcome::Exceeded(shortfalls) => {
            assert_eq!(shortfalls.len(), 1);
            assert_eq!(shortfalls[0].index, 2);
        }
        other => panic!("expected Exceeded, got {:?}", other),
    }

    for counters in store.counters(&scopes).await.unwrap() {
        assert_eq!(counters, ScopeCounters::default());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_engines_share_limit() {
    let Some(store) = redis_store() else {
        return;
    };
    // Two engines over one store model two gateway processes.
    let engines: Vec<Arc<ReservationEngine>> = (0..2)
        .map(|_| {
            Arc::new(ReservationEngine::new(
                store.clone(),
                policy(r#"{"default": {"per_day": 100}}"#),
                DegradationPolicy::fail_closed(),
            ))
        })
        .collect();
    let scopes = scopes("alice");

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let engine = Arc::clone(&engines[i % 2]);
            let scopes = scopes.clone();
            tokio::spawn(async move { engine.reserve(scopes, 10).await })
        })
        .collect();

    let mut granted = 0;
    let mut exceeded = 0;
    for task in futures::future::join_all(tasks).await {
        match task.unwrap() {
            Ok(_) => granted += 1,
            Err(BudgetError::BudgetExceeded { .. }) => exceeded += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(granted, 10);
    assert_eq!(exceeded, 30);
    for counters in store.counters(&scopes).await.unwrap() {
        assert_eq!(counters.reserved, 100);
    }
}
