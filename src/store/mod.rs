//! Counter stores
//!
//! The only shared mutable state in the system is one `{reserved, used}`
//! counter pair per [`ScopeKey`], plus one record per open reservation. Every
//! mutation goes through a single atomic store operation:
//!
//! - **reserve**: check `used + reserved + amount <= limit` on every scope and,
//!   only if all pass, add `amount` to every `reserved` and write the
//!   reservation record
//! - **commit**: delete the record; `reserved -= amount`, `used += actual`
//! - **release**: delete the record; `reserved -= amount`
//!
//! The reservation record holds both the amount and the counter keys it was
//! taken on. Commit and release work from the record alone, so they only ever
//! touch the buckets that were reserved. They are no-ops reporting
//! [`ResolveOutcome::NotFound`] when the record is gone (already resolved or
//! expired). Counters never go below zero.

pub mod error;
pub mod memory;
pub mod redis_store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::scope::ScopeKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persisted counters for one scope bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCounters {
    /// Tokens held by open reservations
    pub reserved: u64,
    /// Tokens committed as actually consumed
    pub used: u64,
}

/// A scope that failed the headroom check, with the counters observed at
/// the time of the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeShortfall {
    /// Index into the scope list passed to `reserve`
    pub index: usize,
    pub counters: ScopeCounters,
}

/// Result of an atomic reserve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    /// Nothing was changed; every failing scope is listed
    Exceeded(Vec<ScopeShortfall>),
}

/// Result of an atomic commit or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Counters updated and reservation record removed. Carries the amount
    /// the store had on record for the reservation.
    Resolved { held: u64 },
    /// No open reservation with that id
    NotFound,
}

/// Atomic counter store.
///
/// Implementations must make each method indivisible with respect to every
/// other call on any overlapping scope.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &str;

    /// `limits[i]` applies to `scopes[i]`; `None` means track without a cap.
    async fn reserve(
        &self,
        reservation_id: &str,
        scopes: &[ScopeKey],
        limits: &[Option<u64>],
        amount: u64,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Applies to the counters and amount recorded at reserve time.
    async fn commit(
        &self,
        reservation_id: &str,
        actual: u64,
    ) -> Result<ResolveOutcome, StoreError>;

    async fn release(&self, reservation_id: &str) -> Result<ResolveOutcome, StoreError>;

    /// Current counters; missing buckets read as zero.
    async fn counters(&self, scopes: &[ScopeKey]) -> Result<Vec<ScopeCounters>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
