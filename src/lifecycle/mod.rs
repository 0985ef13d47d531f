//! Reservation lifecycle
//!
//! Every reservation ends in exactly one of commit or release, on every exit
//! path. Two shapes are offered:
//!
//! - [`with_budget`] returns a [`BudgetGuard`]; call [`BudgetGuard::finish`]
//!   on success or [`BudgetGuard::abort`] on failure. A guard dropped without
//!   either (early return, `?`, panic, task cancellation) releases in a
//!   background task.
//! - [`run_with_budget`] wraps an async closure: `Ok` commits, `Err`
//!   releases and the work's error is returned unchanged.
//!
//! If the process dies between reserve and resolve, the reservation TTL is
//! the backstop.

use crate::engine::{BudgetError, BudgetReservationToken, CommitOutcome, ReservationEngine};
use crate::scope::ScopeKey;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

const UNSET: u64 = u64::MAX;

/// Shared slot for reporting actual usage from inside budgeted work.
///
/// Cloning shares the slot. The last value written wins; when nothing is
/// written the estimate is committed.
#[derive(Debug, Clone)]
pub struct ActualTokens(Arc<AtomicU64>);

impl ActualTokens {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(UNSET)))
    }

    pub fn set(&self, tokens: u64) {
        self.0.store(tokens.min(UNSET - 1), Ordering::Release);
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            UNSET => None,
            tokens => Some(tokens),
        }
    }
}

impl Default for ActualTokens {
    fn default() -> Self {
        Self::new()
    }
}

/// Open reservation owned by one unit of work.
pub struct BudgetGuard {
    engine: Arc<ReservationEngine>,
    token: Option<BudgetReservationToken>,
    reservation_id: String,
    estimated: u64,
    actual: ActualTokens,
}

impl std::fmt::Debug for BudgetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetGuard")
            .field("reservation_id", &self.reservation_id)
            .field("estimated", &self.estimated)
            .field("actual", &self.actual.get())
            .field("open", &self.token.is_some())
            .finish()
    }
}

impl BudgetGuard {
    fn new(engine: Arc<ReservationEngine>, token: BudgetReservationToken) -> Self {
        Self {
            engine,
            reservation_id: token.id().to_string(),
            estimated: token.amount(),
            token: Some(token),
            actual: ActualTokens::new(),
        }
    }

    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.estimated
    }

    pub fn is_synthetic(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(BudgetReservationToken::is_synthetic)
    }

    pub fn set_actual_tokens(&self, tokens: u64) {
        self.actual.set(tokens);
    }

    /// Handle for reporting usage from code that does not own the guard.
    pub fn actual_tokens(&self) -> ActualTokens {
        self.actual.clone()
    }

    /// Commit the reported actual usage, or the estimate if none was set.
    pub async fn finish(mut self) -> Result<CommitOutcome, BudgetError> {
        let actual = self.actual.get().unwrap_or(self.estimated);
        match self.token.take() {
            Some(token) => self.engine.commit(token, actual).await,
            None => Err(BudgetError::ReservationNotFound {
                reservation_id: self.reservation_id.clone(),
            }),
        }
    }

    /// Release without recording usage.
    pub async fn abort(mut self) -> Result<(), BudgetError> {
        match self.token.take() {
            Some(token) => self.engine.release(token).await,
            None => Err(BudgetError::ReservationNotFound {
                reservation_id: self.reservation_id.clone(),
            }),
        }
    }
}

impl Drop for BudgetGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if token.is_synthetic() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    reservation_id = %self.reservation_id,
                    "Budget guard dropped without commit or release; releasing"
                );
                let engine = Arc::clone(&self.engine);
                handle.spawn(async move {
                    let reservation_id = token.id().to_string();
                    match engine.release(token).await {
                        Ok(()) | Err(BudgetError::ReservationNotFound { .. }) => {}
                        Err(e) => tracing::error!(
                            reservation_id = %reservation_id,
                            error = %e,
                            "Background release failed"
                        ),
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    reservation_id = %self.reservation_id,
                    "Budget guard dropped outside a runtime; reservation held until TTL expiry"
                );
            }
        }
    }
}

/// Reserve `estimated` tokens on `scopes` and return a guard for the work.
pub async fn with_budget(
    engine: &Arc<ReservationEngine>,
    scopes: Vec<ScopeKey>,
    estimated: u64,
) -> Result<BudgetGuard, BudgetError> {
    let token = engine.reserve(scopes, estimated).await?;
    Ok(BudgetGuard::new(Arc::clone(engine), token))
}

/// Error from [`run_with_budget`]
#[derive(Debug, Error)]
pub enum BudgetScopeError<E> {
    /// The reservation was refused; the work never ran
    #[error(transparent)]
    Budget(BudgetError),
    /// The work failed; its reservation was released
    #[error("{0}")]
    Work(E),
}

impl<E> BudgetScopeError<E> {
    pub fn into_work(self) -> Option<E> {
        match self {
            BudgetScopeError::Work(e) => Some(e),
            BudgetScopeError::Budget(_) => None,
        }
    }
}

/// Run `work` under a reservation.
///
/// The closure receives an [`ActualTokens`] handle for reporting real usage.
/// On `Ok` the reservation is committed; a commit failure is logged and does
/// not discard the work's output. On `Err` the reservation is released.
pub async fn run_with_budget<F, Fut, T, E>(
    engine: &Arc<ReservationEngine>,
    scopes: Vec<ScopeKey>,
    estimated: u64,
    work: F,
) -> Result<T, BudgetScopeError<E>>
where
    F: FnOnce(ActualTokens) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let guard = with_budget(engine, scopes, estimated)
        .await
        .map_err(BudgetScopeError::Budget)?;

    match work(guard.actual_tokens()).await {
        Ok(value) => {
            let reservation_id = guard.reservation_id().to_string();
            if let Err(e) = guard.finish().await {
                tracing::error!(
                    reservation_id = %reservation_id,
                    error = %e,
                    "Commit after successful work failed"
                );
            }
            Ok(value)
        }
        Err(err) => {
            let reservation_id = guard.reservation_id().to_string();
            if let Err(e) = guard.abort().await {
                tracing::error!(
                    reservation_id = %reservation_id,
                    error = %e,
                    "Release after failed work failed"
                );
            }
            Err(BudgetScopeError::Work(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::degradation::DegradationPolicy;
    use crate::policy::{validate_policy, PolicyDocument, PolicyStrictness};
    use crate::store::MemoryStore;

    fn setup(limit: u64) -> (Arc<ReservationEngine>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let doc =
            PolicyDocument::from_json(&format!(r#"{{"default": {{"per_day": {}}}}}"#, limit))
                .unwrap();
        let policy = validate_policy(doc, PolicyStrictness::Strict).unwrap();
        let engine = Arc::new(ReservationEngine::new(
            store.clone(),
            policy,
            DegradationPolicy::fail_closed(),
        ));
        (engine, store)
    }

    #[test]
    fn test_actual_tokens_slot() {
        let slot = ActualTokens::new();
        assert_eq!(slot.get(), None);
        slot.clone().set(42);
        assert_eq!(slot.get(), Some(42));
        slot.set(u64::MAX);
        assert_eq!(slot.get(), Some(u64::MAX - 1));
    }

    #[tokio::test]
    async fn test_finish_commits_estimate_when_unset() {
        let (engine, store) = setup(1000);
        let scopes = engine.scopes("acme", "alice", "openai", "gpt-4o").unwrap();

        let guard = with_budget(&engine, scopes.clone(), 30).await.unwrap();
        let outcome = guard.finish().await.unwrap();
        assert_eq!(outcome.actual, 30);
        assert_eq!(store.open_reservations(), 0);
    }

    #[tokio::test]
    async fn test_abort_releases() {
        let (engine, store) = setup(1000);
        let scopes = engine.scopes("acme", "alice", "openai", "gpt-4o").unwrap();

        let guard = with_budget(&engine, scopes.clone(), 30).await.unwrap();
        guard.abort().await.unwrap();

        assert_eq!(store.open_reservations(), 0);
        let usage = engine.usage(&scopes).await.unwrap();
        assert!(usage.iter().all(|s| s.used == 0 && s.reserved == 0));
    }

    #[tokio::test]
    async fn test_run_with_budget_passes_work_error_through() {
        let (engine, store) = setup(1000);
        let scopes = engine.scopes("acme", "alice", "openai", "gpt-4o").unwrap();

        let result: Result<(), _> = run_with_budget(&engine, scopes, 30, |_| async {
            Err::<(), _>("upstream timeout")
        })
        .await;

        assert_eq!(result.unwrap_err().into_work(), Some("upstream timeout"));
        assert_eq!(store.open_reservations(), 0);
    }
}
