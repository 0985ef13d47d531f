//! In-process counter store
//!
//! Same semantics as the Redis store, serialized by a single mutex. Only
//! meaningful for one process: local development, tests, and single-node
//! deployments.

use super::{
    CounterStore, ReserveOutcome, ResolveOutcome, ScopeCounters, ScopeShortfall, StoreError,
};
use crate::scope::ScopeKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// Open reservation: the held amount and the counter keys it was taken on.
struct Hold {
    amount: u64,
    keys: Vec<String>,
}

#[derive(Default)]
struct State {
    counters: HashMap<String, Entry<ScopeCounters>>,
    reservations: HashMap<String, Entry<Hold>>,
}

impl State {
    fn purge_expired(&mut self, now: Instant) {
        self.counters.retain(|_, e| e.expires_at > now);
        self.reservations.retain(|_, e| e.expires_at > now);
    }

    fn counters(&self, key: &str) -> ScopeCounters {
        self.counters.get(key).map(|e| e.value).unwrap_or_default()
    }

    fn resolve(
        &mut self,
        reservation_id: &str,
        actual: u64,
        expires_at: Instant,
    ) -> ResolveOutcome {
        let Some(Entry { value: hold, .. }) = self.reservations.remove(reservation_id) else {
            return ResolveOutcome::NotFound;
        };
        for key in hold.keys {
            let entry = self.counters.entry(key).or_insert_with(|| Entry {
                value: ScopeCounters::default(),
                expires_at,
            });
            entry.value.reserved = entry.value.reserved.saturating_sub(hold.amount);
            entry.value.used = entry.value.used.saturating_add(actual);
            entry.expires_at = expires_at;
        }
        ResolveOutcome::Resolved { held: hold.amount }
    }
}

/// Mutex-guarded counters with TTL expiry.
pub struct MemoryStore {
    state: Mutex<State>,
    ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(48 * 3600))
    }
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ttl,
        }
    }

    /// Number of reservations currently open (not resolved, not expired).
    pub fn open_reservations(&self) -> usize {
        let mut state = self.lock();
        state.purge_expired(Instant::now());
        state.reservations.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied
        // operation: every mutation runs after all checks.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn reserve(
        &self,
        reservation_id: &str,
        scopes: &[ScopeKey],
        limits: &[Option<u64>],
        amount: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        if scopes.len() != limits.len() {
            return Err(StoreError::Protocol {
                operation: "reserve",
                message: format!("{} scopes but {} limits", scopes.len(), limits.len()),
            });
        }

        let now = Instant::now();
        let mut state = self.lock();
        state.purge_expired(now);

        if state.reservations.contains_key(reservation_id) {
            return Err(StoreError::DuplicateReservation(reservation_id.to_string()));
        }

        let keys: Vec<String> = scopes.iter().map(ScopeKey::to_string).collect();
        let shortfalls: Vec<ScopeShortfall> = keys
            .iter()
            .zip(limits)
            .enumerate()
            .filter_map(|(index, (key, limit))| {
                let counters = state.counters(key);
                let limit = (*limit)?;
                let projected = counters
                    .used
                    .saturating_add(counters.reserved)
                    .saturating_add(amount);
                (projected > limit).then_some(ScopeShortfall { index, counters })
            })
            .collect();

        if !shortfalls.is_empty() {
            return Ok(ReserveOutcome::Exceeded(shortfalls));
        }

        let expires_at = now + self.ttl;
        for key in &keys {
            let entry = state.counters.entry(key.clone()).or_insert_with(|| Entry {
                value: ScopeCounters::default(),
                expires_at,
            });
            entry.value.reserved = entry.value.reserved.saturating_add(amount);
            entry.expires_at = expires_at;
        }
        state.reservations.insert(
            reservation_id.to_string(),
            Entry {
                value: Hold { amount, keys },
                expires_at,
            },
        );

        Ok(ReserveOutcome::Reserved)
    }

    async fn commit(
        &self,
        reservation_id: &str,
        actual: u64,
    ) -> Result<ResolveOutcome, StoreError> {
        let now = Instant::now();
        let mut state = self.lock();
        state.purge_expired(now);
        Ok(state.resolve(reservation_id, actual, now + self.ttl))
    }

    async fn release(&self, reservation_id: &str) -> Result<ResolveOutcome, StoreError> {
        let now = Instant::now();
        let mut state = self.lock();
        state.purge_expired(now);
        Ok(state.resolve(reservation_id, 0, now + self.ttl))
    }

    async fn counters(&self, scopes: &[ScopeKey]) -> Result<Vec<ScopeCounters>, StoreError> {
        let mut state = self.lock();
        state.purge_expired(Instant::now());
        Ok(scopes
            .iter()
            .map(|scope| state.counters(&scope.to_string()))
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeType, Window};
    use chrono::Utc;
    use std::sync::Arc;

    fn scope(scope_type: ScopeType, id: &str) -> ScopeKey {
        ScopeKey::new(scope_type, id, Window::PerDay, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_reserve_increments_every_scope() {
        let store = MemoryStore::default();
        let scopes = vec![scope(ScopeType::Org, "acme"), scope(ScopeType::User, "alice")];

        let outcome = store
            .reserve("r1", &scopes, &[Some(100), Some(100)], 60)
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::Reserved);

        let counters = store.counters(&scopes).await.unwrap();
        assert!(counters.iter().all(|c| c.reserved == 60 && c.used == 0));
    }

    #[tokio::test]
    async fn test_reserve_all_or_nothing() {
        let store = MemoryStore::default();
        let a = scope(ScopeType::Org, "acme");
        let b = scope(ScopeType::User, "alice");

        let outcome = store
            .reserve("r1", &[a.clone(), b.clone()], &[Some(100), Some(10)], 50)
            .await
            .unwrap();

        match outcome {
            ReserveOutcome::Exceeded(shortfalls) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].index, 1);
            }
            other => panic!("expected Exceeded, got {:?}", other),
        }

        let counters = store.counters(&[a, b]).await.unwrap();
        assert_eq!(counters[0], ScopeCounters::default());
        assert_eq!(store.open_reservations(), 0);
    }

    #[tokio::test]
    async fn test_unlimited_scope_is_tracked() {
        let store = MemoryStore::default();
        let a = scope(ScopeType::Model, "gpt-4o");

        store.reserve("r1", &[a.clone()], &[None], 1_000_000).await.unwrap();
        let counters = store.counters(&[a]).await.unwrap();
        assert_eq!(counters[0].reserved, 1_000_000);
    }

    #[tokio::test]
    async fn test_commit_moves_reserved_to_used() {
        let store = MemoryStore::default();
        let a = scope(ScopeType::Org, "acme");

        store.reserve("r1", &[a.clone()], &[Some(100)], 40).await.unwrap();
        let outcome = store.commit("r1", 55).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved { held: 40 });

        let counters = store.counters(&[a]).await.unwrap();
        assert_eq!(counters[0], ScopeCounters { reserved: 0, used: 55 });
    }

    #[tokio::test]
    async fn test_second_resolve_is_not_found() {
        let store = MemoryStore::default();
        let a = scope(ScopeType::Org, "acme");

        store.reserve("r1", &[a.clone()], &[Some(100)], 40).await.unwrap();
        store.commit("r1", 40).await.unwrap();

        assert_eq!(
            store.commit("r1", 40).await.unwrap(),
            ResolveOutcome::NotFound
        );
        assert_eq!(
            store.release("r1").await.unwrap(),
            ResolveOutcome::NotFound
        );

        let counters = store.counters(&[a]).await.unwrap();
        assert_eq!(counters[0], ScopeCounters { reserved: 0, used: 40 });
    }

    #[tokio::test]
    async fn test_resolve_touches_only_recorded_counters() {
        let store = MemoryStore::default();
        let acme = scope(ScopeType::Org, "acme");
        let globex = scope(ScopeType::Org, "globex");

        store.reserve("r1", &[acme.clone()], &[Some(100)], 30).await.unwrap();
        store.reserve("r2", &[globex.clone()], &[Some(100)], 20).await.unwrap();
        store.commit("r1", 25).await.unwrap();

        let counters = store.counters(&[acme, globex]).await.unwrap();
        assert_eq!(counters[0], ScopeCounters { reserved: 0, used: 25 });
        assert_eq!(counters[1], ScopeCounters { reserved: 20, used: 0 });
    }

    #[tokio::test]
    async fn test_duplicate_reservation_id_rejected() {
        let store = MemoryStore::default();
        let a = scope(ScopeType::Org, "acme");

        store.reserve("r1", &[a.clone()], &[Some(100)], 1).await.unwrap();
        let result = store.reserve("r1", &[a], &[Some(100)], 1).await;
        assert!(matches!(result, Err(StoreError::DuplicateReservation(_))));
    }

    #[tokio::test]
    async fn test_expired_reservation_and_counters_disappear() {
        let store = MemoryStore::new(Duration::from_millis(20));
        let a = scope(ScopeType::Org, "acme");

        store.reserve("r1", &[a.clone()], &[Some(100)], 100).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.open_reservations(), 0);
        let counters = store.counters(&[a.clone()]).await.unwrap();
        assert_eq!(counters[0], ScopeCounters::default());
        assert_eq!(
            store.release("r1").await.unwrap(),
            ResolveOutcome::NotFound
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Concurrent reservations against one scope never exceed its limit.
            #[test]
            fn prop_concurrent_reserves_never_exceed_limit(
                limit in 1u64..500,
                amounts in proptest::collection::vec(1u64..100, 1..40),
            ) {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(4)
                    .build()
                    .unwrap();

                let granted: u64 = runtime.block_on(async {
                    let store = Arc::new(MemoryStore::default());
                    let key = scope(ScopeType::Org, "acme");

                    let tasks: Vec<_> = amounts
                        .iter()
                        .enumerate()
                        .map(|(i, amount)| {
                            let store = Arc::clone(&store);
                            let key = key.clone();
                            let amount = *amount;
                            tokio::spawn(async move {
                                let outcome = store
                                    .reserve(&format!("r{}", i), &[key], &[Some(limit)], amount)
                                    .await
                                    .unwrap();
                                if outcome == ReserveOutcome::Reserved { amount } else { 0 }
                            })
                        })
                        .collect();

                    let mut total = 0;
                    for task in tasks {
                        total += task.await.unwrap();
                    }

                    let counters = store.counters(&[key]).await.unwrap();
                    assert_eq!(counters[0].reserved, total);
                    total
                });

                prop_assert!(granted <= limit);
            }
        }
    }
}
