//! Reservation tokens and commit outcomes

use crate::scope::ScopeKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id prefix of tokens issued without a store reservation
const SYNTHETIC_ID_PREFIX: &str = "synthetic-";

/// Proof of a successful reserve.
///
/// Deliberately not `Clone`: `commit` and `release` take it by value, so a
/// token can be resolved at most once in-process. Tokens that come back over
/// the wire are checked against the store's reservation record instead, and
/// only their id is trusted: the store resolves the counters and amount it
/// recorded, and `synthetic` is recomputed from the id on deserialize.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireToken")]
pub struct BudgetReservationToken {
    id: String,
    /// Scopes with the window buckets captured at reserve time
    scopes: Vec<ScopeKey>,
    amount: u64,
    created_at: DateTime<Utc>,
    /// Issued without touching the store (fail-open or disabled enforcement)
    synthetic: bool,
}

/// Token as received from a client; any `synthetic` field is ignored.
#[derive(Deserialize)]
struct WireToken {
    id: String,
    scopes: Vec<ScopeKey>,
    amount: u64,
    created_at: DateTime<Utc>,
}

impl From<WireToken> for BudgetReservationToken {
    fn from(wire: WireToken) -> Self {
        Self {
            synthetic: wire.id.starts_with(SYNTHETIC_ID_PREFIX),
            id: wire.id,
            scopes: wire.scopes,
            amount: wire.amount,
            created_at: wire.created_at,
        }
    }
}

impl BudgetReservationToken {
    pub(crate) fn new(id: String, scopes: Vec<ScopeKey>, amount: u64) -> Self {
        Self {
            id,
            scopes,
            amount,
            created_at: Utc::now(),
            synthetic: false,
        }
    }

    pub(crate) fn synthetic(scopes: Vec<ScopeKey>, amount: u64) -> Self {
        Self {
            id: format!("{}{}", SYNTHETIC_ID_PREFIX, uuid::Uuid::new_v4()),
            scopes,
            amount,
            created_at: Utc::now(),
            synthetic: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scopes(&self) -> &[ScopeKey] {
        &self.scopes
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverspendSeverity {
    /// Actual usage above the reservation
    Over,
    /// Actual usage above five times the reservation
    Anomaly,
}

/// Anything a commit consumed beyond its reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Overspend {
    pub excess: u64,
    pub severity: OverspendSeverity,
}

/// Multiplier above which an overspend is flagged as an anomaly
pub const ANOMALY_FACTOR: u64 = 5;

impl Overspend {
    pub fn detect(reserved: u64, actual: u64) -> Option<Self> {
        if actual <= reserved {
            return None;
        }
        let severity = if actual > reserved.saturating_mul(ANOMALY_FACTOR) {
            OverspendSeverity::Anomaly
        } else {
            OverspendSeverity::Over
        };
        Some(Self {
            excess: actual - reserved,
            severity,
        })
    }
}

/// What a commit did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub reservation_id: String,
    pub reserved: u64,
    pub actual: u64,
    pub synthetic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overspend: Option<Overspend>,
}
