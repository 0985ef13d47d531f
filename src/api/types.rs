//! Request and response bodies.

use crate::engine::{BudgetReservationToken, ScopeStatus};
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/reservations`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReserveRequest {
    pub org_id: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub estimated_tokens: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub token: BudgetReservationToken,
}

/// Body of `POST /v1/reservations/commit`.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommitRequest {
    pub token: BudgetReservationToken,
    pub actual_tokens: u64,
}

/// Body of `POST /v1/reservations/release`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ReleaseRequest {
    pub token: BudgetReservationToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub reservation_id: String,
    pub released: bool,
}

/// Query string of `GET /v1/usage`.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageQuery {
    pub org_id: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub scopes: Vec<ScopeStatus>,
}
