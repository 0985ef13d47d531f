//! Budget engine error types

use crate::scope::{ScopeError, ScopeKey};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// One scope without headroom for a rejected reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExhaustedScope {
    pub scope: ScopeKey,
    pub used: u64,
    pub reserved: u64,
    pub requested: u64,
    pub limit: u64,
    /// When the scope's window rolls over
    pub resets_at: Option<DateTime<Utc>>,
}

impl fmt::Display for ExhaustedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (used {} + reserved {} + requested {} > limit {}",
            self.scope, self.used, self.reserved, self.requested, self.limit
        )?;
        match self.resets_at {
            Some(at) => write!(f, ", resets {})", at.to_rfc3339()),
            None => write!(f, ")"),
        }
    }
}

fn describe(scopes: &[ExhaustedScope]) -> String {
    scopes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from reserve, commit, release and usage queries
#[derive(Debug, Error)]
pub enum BudgetError {
    /// Legitimate rejection; callers surface it, never retry it blindly
    #[error("Budget exceeded: {}", describe(.scopes))]
    BudgetExceeded { scopes: Vec<ExhaustedScope> },

    #[error("No budget policy covers scope '{scope}'")]
    PolicyNotFound { scope: String },

    /// Store failure on reserve under fail-closed enforcement
    #[error("Budget store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// `reserved` may stay inflated until the reservation TTL expires
    #[error("Failed to commit reservation {reservation_id}: {source}")]
    CommitFailed {
        reservation_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to release reservation {reservation_id}: {source}")]
    ReleaseFailed {
        reservation_id: String,
        #[source]
        source: StoreError,
    },

    /// Already committed/released, or expired
    #[error("Reservation {reservation_id} is not open")]
    ReservationNotFound { reservation_id: String },

    #[error("Invalid scope: {0}")]
    InvalidScope(#[from] ScopeError),
}

impl BudgetError {
    /// True when the request must not proceed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BudgetError::BudgetExceeded { .. }
                | BudgetError::PolicyNotFound { .. }
                | BudgetError::StoreUnavailable(_)
        )
    }

    /// Scopes without headroom, for `BudgetExceeded`
    pub fn exhausted_scopes(&self) -> &[ExhaustedScope] {
        match self {
            BudgetError::BudgetExceeded { scopes } => scopes,
            _ => &[],
        }
    }
}
