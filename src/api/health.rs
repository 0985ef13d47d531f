//! Health check endpoint handler.

use crate::api::AppState;
use crate::config::{EnforcementMode, Environment};
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub store: StoreHealth,
    pub enforcement: EnforcementMode,
    pub environment: Environment,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub backend: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health - Return service health.
///
/// An unreachable store is `unhealthy` under strict enforcement (every
/// reserve is rejected) and `degraded` otherwise (requests pass unmetered).
pub async fn handle(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let degradation = state.engine.degradation();
    let ping = state.engine.ping().await;

    let status = match (&ping, degradation.mode()) {
        (_, EnforcementMode::Disabled) => "degraded",
        (Ok(()), _) => "healthy",
        (Err(_), EnforcementMode::FailOpen) => "degraded",
        (Err(_), EnforcementMode::Strict) => "unhealthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealth {
            backend: state.engine.store_name().to_string(),
            reachable: ping.is_ok(),
            error: ping.err().map(|e| e.to_string()),
        },
        enforcement: degradation.mode(),
        environment: degradation.environment(),
    })
}
