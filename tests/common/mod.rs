//! Shared test utilities for tokengate integration tests.
//!
//! Engine builders, fixed timestamps, and store doubles for simulating
//! outages.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokengate::api::{create_router, AppState};
use tokengate::config::TokengateConfig;
use tokengate::degradation::DegradationPolicy;
use tokengate::engine::ReservationEngine;
use tokengate::policy::{validate_policy, BudgetPolicy, PolicyDocument, PolicyStrictness};
use tokengate::scope::ScopeKey;
use tokengate::store::{
    CounterStore, MemoryStore, ReserveOutcome, ResolveOutcome, ScopeCounters, StoreError,
};

// =============================================================================
// Policies and engines
// =============================================================================

/// Parse and validate a JSON policy permissively.
pub fn policy(json: &str) -> BudgetPolicy {
    let doc = PolicyDocument::from_json(json).unwrap();
    validate_policy(doc, PolicyStrictness::Permissive).unwrap()
}

/// Fail-closed engine over a fresh memory store.
pub fn memory_engine(json: &str) -> (Arc<ReservationEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let engine = Arc::new(ReservationEngine::new(
        store.clone(),
        policy(json),
        DegradationPolicy::fail_closed(),
    ));
    (engine, store)
}

pub fn engine_with(
    store: Arc<dyn CounterStore>,
    json: &str,
    degradation: DegradationPolicy,
) -> Arc<ReservationEngine> {
    Arc::new(ReservationEngine::new(store, policy(json), degradation))
}

/// Router over `engine` with default config.
pub fn test_app(engine: Arc<ReservationEngine>) -> axum::Router {
    let state = Arc::new(AppState::new(engine, Arc::new(TokengateConfig::default())));
    create_router(state)
}

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

// =============================================================================
// Store doubles
// =============================================================================

/// Store whose every call fails, as if Redis were unreachable.
#[derive(Default)]
pub struct UnreachableStore {
    pub calls: AtomicUsize,
}

impl UnreachableStore {
    fn fail(&self, operation: &'static str) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::Timeout {
            operation,
            timeout_ms: 250,
        }
    }
}

#[async_trait]
impl CounterStore for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn reserve(
        &self,
        _reservation_id: &str,
        _scopes: &[ScopeKey],
        _limits: &[Option<u64>],
        _amount: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        Err(self.fail("reserve"))
    }

    async fn commit(
        &self,
        _reservation_id: &str,
        _actual: u64,
    ) -> Result<ResolveOutcome, StoreError> {
        Err(self.fail("commit"))
    }

    async fn release(&self, _reservation_id: &str) -> Result<ResolveOutcome, StoreError> {
        Err(self.fail("release"))
    }

    async fn counters(&self, _scopes: &[ScopeKey]) -> Result<Vec<ScopeCounters>, StoreError> {
        Err(self.fail("counters"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(self.fail("ping"))
    }
}

/// Memory store that can be switched off mid-test.
#[derive(Default)]
pub struct SwitchableStore {
    pub inner: MemoryStore,
    down: AtomicBool,
}

impl SwitchableStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!("{} while switched off", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for SwitchableStore {
    fn name(&self) -> &str {
        "switchable"
    }

    async fn reserve(
        &self,
        reservation_id: &str,
        scopes: &[ScopeKey],
        limits: &[Option<u64>],
        amount: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        self.check("reserve")?;
        self.inner.reserve(reservation_id, scopes, limits, amount).await
    }

    async fn commit(
        &self,
        reservation_id: &str,
        actual: u64,
    ) -> Result<ResolveOutcome, StoreError> {
        self.check("commit")?;
        self.inner.commit(reservation_id, actual).await
    }

    async fn release(&self, reservation_id: &str) -> Result<ResolveOutcome, StoreError> {
        self.check("release")?;
        self.inner.release(reservation_id).await
    }

    async fn counters(&self, scopes: &[ScopeKey]) -> Result<Vec<ScopeCounters>, StoreError> {
        self.check("counters")?;
        self.inner.counters(scopes).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check("ping")
    }
}
