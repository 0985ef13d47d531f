//! Atomic reservation engine
//!
//! Sits between callers and the [`CounterStore`]: resolves limits from the
//! current [`BudgetPolicy`], applies the [`DegradationPolicy`] when the store
//! or the policy cannot answer, and turns store outcomes into tokens, commit
//! outcomes and [`BudgetError`]s.
//!
//! The policy is held in an [`ArcSwap`] so it can be replaced at runtime
//! without blocking in-flight reservations. A reservation keeps the limits it
//! was admitted under; later commits only touch counters.

pub mod error;
pub mod token;

pub use error::{BudgetError, ExhaustedScope};
pub use token::{BudgetReservationToken, CommitOutcome, Overspend, OverspendSeverity};

use crate::degradation::{DegradationPolicy, MissingPolicyAction, StoreFailureAction};
use crate::metrics;
use crate::policy::{BudgetPolicy, PolicyError};
use crate::scope::{build_scopes_with, ScopeKey};
use crate::store::{CounterStore, ReserveOutcome, ResolveOutcome, StoreError};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Counters and headroom for one scope bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeStatus {
    pub scope: ScopeKey,
    pub used: u64,
    pub reserved: u64,
    /// `None` when the scope is uncapped
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub resets_at: Option<DateTime<Utc>>,
}

pub struct ReservationEngine {
    store: Arc<dyn CounterStore>,
    policy: ArcSwap<BudgetPolicy>,
    degradation: DegradationPolicy,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn CounterStore>,
        policy: BudgetPolicy,
        degradation: DegradationPolicy,
    ) -> Self {
        Self {
            store,
            policy: ArcSwap::from_pointee(policy),
            degradation,
        }
    }

    pub fn policy(&self) -> Arc<BudgetPolicy> {
        self.policy.load_full()
    }

    /// Swap in a new policy. Open reservations are unaffected.
    pub fn replace_policy(&self, policy: BudgetPolicy) {
        self.policy.store(Arc::new(policy));
        tracing::info!("Budget policy replaced");
    }

    pub fn degradation(&self) -> &DegradationPolicy {
        &self.degradation
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Scope keys for a request, in the buckets containing the current time.
    pub fn scopes(
        &self,
        org_id: &str,
        user_id: &str,
        provider: &str,
        model: &str,
    ) -> Result<Vec<ScopeKey>, BudgetError> {
        self.scopes_at(org_id, user_id, provider, model, Utc::now())
    }

    /// Each scope type gets keys only for the windows the policy limits it
    /// on.
    pub fn scopes_at(
        &self,
        org_id: &str,
        user_id: &str,
        provider: &str,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScopeKey>, BudgetError> {
        let policy = self.policy.load();
        Ok(build_scopes_with(
            org_id,
            user_id,
            provider,
            model,
            |scope_type, id| policy.windows_for(scope_type, id),
            now,
        )?)
    }

    /// Atomically hold `amount` tokens on every scope, or on none.
    pub async fn reserve(
        &self,
        scopes: Vec<ScopeKey>,
        amount: u64,
    ) -> Result<BudgetReservationToken, BudgetError> {
        if !self.degradation.enforces() {
            metrics::record_reservation("synthetic", amount);
            return Ok(BudgetReservationToken::synthetic(scopes, amount));
        }

        let limits = self.resolve_limits(&scopes)?;
        let reservation_id = uuid::Uuid::new_v4().to_string();

        let start = Instant::now();
        let result = self
            .store
            .reserve(&reservation_id, &scopes, &limits, amount)
            .await;
        metrics::record_store_call("reserve", start.elapsed(), result.is_err());

        match result {
            Ok(ReserveOutcome::Reserved) => {
                metrics::record_reservation("reserved", amount);
                tracing::debug!(
                    reservation_id = %reservation_id,
                    amount,
                    scopes = scopes.len(),
                    "Budget reserved"
                );
                Ok(BudgetReservationToken::new(reservation_id, scopes, amount))
            }
            Ok(ReserveOutcome::Exceeded(shortfalls)) => {
                let exhausted: Vec<ExhaustedScope> = shortfalls
                    .into_iter()
                    .filter_map(|shortfall| {
                        let scope = scopes.get(shortfall.index)?.clone();
                        let limit = limits.get(shortfall.index).copied().flatten()?;
                        Some(ExhaustedScope {
                            resets_at: scope.resets_at(),
                            scope,
                            used: shortfall.counters.used,
                            reserved: shortfall.counters.reserved,
                            requested: amount,
                            limit,
                        })
                    })
                    .collect();

                metrics::record_reservation("exceeded", amount);
                for scope in &exhausted {
                    tracing::info!(
                        scope = %scope.scope,
                        used = scope.used,
                        reserved = scope.reserved,
                        requested = amount,
                        limit = scope.limit,
                        "Budget exceeded"
                    );
                }
                Err(BudgetError::BudgetExceeded { scopes: exhausted })
            }
            Err(e) => self.on_store_failure(e, scopes, amount),
        }
    }

    /// Settle a reservation with the tokens actually consumed.
    ///
    /// Overspend is recorded, never blocked.
    pub async fn commit(
        &self,
        token: BudgetReservationToken,
        actual: u64,
    ) -> Result<CommitOutcome, BudgetError> {
        if token.is_synthetic() {
            metrics::record_resolution("commit", "synthetic", 0);
            return Ok(CommitOutcome {
                reservation_id: token.id().to_string(),
                reserved: token.amount(),
                actual,
                synthetic: true,
                overspend: None,
            });
        }

        let start = Instant::now();
        let result = self.store.commit(token.id(), actual).await;
        metrics::record_store_call("commit", start.elapsed(), result.is_err());

        match result {
            Ok(ResolveOutcome::Resolved { held }) => {
                metrics::record_resolution("commit", "resolved", actual);
                let overspend = Overspend::detect(held, actual);
                if let Some(overspend) = overspend {
                    log_overspend(&token, held, actual, overspend);
                }
                Ok(CommitOutcome {
                    reservation_id: token.id().to_string(),
                    reserved: held,
                    actual,
                    synthetic: false,
                    overspend,
                })
            }
            Ok(ResolveOutcome::NotFound) => {
                metrics::record_resolution("commit", "not_found", 0);
                tracing::warn!(
                    reservation_id = %token.id(),
                    "Commit for a reservation that is not open"
                );
                Err(BudgetError::ReservationNotFound {
                    reservation_id: token.id().to_string(),
                })
            }
            Err(source) => {
                metrics::record_resolution("commit", "failed", 0);
                tracing::error!(
                    reservation_id = %token.id(),
                    amount = token.amount(),
                    actual,
                    error = %source,
                    "Commit failed; reserved tokens held until TTL expiry"
                );
                Err(BudgetError::CommitFailed {
                    reservation_id: token.id().to_string(),
                    source,
                })
            }
        }
    }

    /// Return a reservation's tokens without recording usage.
    pub async fn release(&self, token: BudgetReservationToken) -> Result<(), BudgetError> {
        if token.is_synthetic() {
            metrics::record_resolution("release", "synthetic", 0);
            return Ok(());
        }

        let start = Instant::now();
        let result = self.store.release(token.id()).await;
        metrics::record_store_call("release", start.elapsed(), result.is_err());

        match result {
            Ok(ResolveOutcome::Resolved { held }) => {
                metrics::record_resolution("release", "resolved", 0);
                tracing::debug!(reservation_id = %token.id(), held, "Budget released");
                Ok(())
            }
            Ok(ResolveOutcome::NotFound) => {
                metrics::record_resolution("release", "not_found", 0);
                tracing::debug!(
                    reservation_id = %token.id(),
                    "Release for a reservation that is not open"
                );
                Err(BudgetError::ReservationNotFound {
                    reservation_id: token.id().to_string(),
                })
            }
            Err(source) => {
                metrics::record_resolution("release", "failed", 0);
                tracing::error!(
                    reservation_id = %token.id(),
                    amount = token.amount(),
                    error = %source,
                    "Release failed; reserved tokens held until TTL expiry"
                );
                Err(BudgetError::ReleaseFailed {
                    reservation_id: token.id().to_string(),
                    source,
                })
            }
        }
    }

    /// Current counters and headroom for `scopes`.
    pub async fn usage(&self, scopes: &[ScopeKey]) -> Result<Vec<ScopeStatus>, BudgetError> {
        let start = Instant::now();
        let result = self.store.counters(scopes).await;
        metrics::record_store_call("counters", start.elapsed(), result.is_err());
        let counters = result.map_err(BudgetError::StoreUnavailable)?;

        let policy = self.policy.load();
        Ok(scopes
            .iter()
            .zip(counters)
            .map(|(scope, counters)| {
                let limit = policy.limit_for(scope).ok();
                let remaining = limit.map(|l| {
                    l.saturating_sub(counters.used.saturating_add(counters.reserved))
                });
                ScopeStatus {
                    scope: scope.clone(),
                    used: counters.used,
                    reserved: counters.reserved,
                    limit,
                    remaining,
                    resets_at: scope.resets_at(),
                }
            })
            .collect())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    fn resolve_limits(&self, scopes: &[ScopeKey]) -> Result<Vec<Option<u64>>, BudgetError> {
        let policy = self.policy.load();
        scopes
            .iter()
            .map(|scope| match policy.limit_for(scope) {
                Ok(limit) => Ok(Some(limit)),
                Err(PolicyError::NotFound { scope }) => match self.degradation.on_missing_policy() {
                    MissingPolicyAction::Reject => {
                        metrics::record_reservation("policy_not_found", 0);
                        tracing::warn!(scope = %scope, "No policy entry for scope; rejecting");
                        Err(BudgetError::PolicyNotFound { scope })
                    }
                    MissingPolicyAction::Unlimited => {
                        tracing::debug!(scope = %scope, "No policy entry for scope; tracking uncapped");
                        Ok(None)
                    }
                },
                Err(e) => Err(BudgetError::PolicyNotFound {
                    scope: format!("{}: {}", scope, e),
                }),
            })
            .collect()
    }

    fn on_store_failure(
        &self,
        error: StoreError,
        scopes: Vec<ScopeKey>,
        amount: u64,
    ) -> Result<BudgetReservationToken, BudgetError> {
        match self.degradation.on_reserve_store_error() {
            StoreFailureAction::Reject => {
                metrics::record_reservation("store_unavailable", amount);
                tracing::error!(
                    store = self.store.name(),
                    amount,
                    error = %error,
                    "Budget store unavailable; rejecting (fail-closed)"
                );
                Err(BudgetError::StoreUnavailable(error))
            }
            StoreFailureAction::Bypass => {
                metrics::record_reservation("synthetic", amount);
                tracing::warn!(
                    store = self.store.name(),
                    amount,
                    error = %error,
                    "Budget store unavailable; allowing unmetered (fail-open)"
                );
                Ok(BudgetReservationToken::synthetic(scopes, amount))
            }
        }
    }
}

fn log_overspend(token: &BudgetReservationToken, held: u64, actual: u64, overspend: Overspend) {
    match overspend.severity {
        OverspendSeverity::Over => {
            metrics::record_overspend("over");
            tracing::warn!(
                reservation_id = %token.id(),
                reserved = held,
                actual,
                excess = overspend.excess,
                "Actual usage exceeded reservation"
            );
        }
        OverspendSeverity::Anomaly => {
            metrics::record_overspend("anomaly");
            tracing::error!(
                reservation_id = %token.id(),
                reserved = held,
                actual,
                excess = overspend.excess,
                scopes = ?token.scopes().iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Actual usage more than {}x reservation; estimator or caller is misbehaving",
                token::ANOMALY_FACTOR
            );
        }
    }
}
