//! # Budget API
//!
//! HTTP surface over the [`ReservationEngine`] for callers that are not
//! linked against this crate.
//!
//! ## Endpoints
//!
//! - `POST /v1/reservations` - reserve an estimate across all request scopes
//! - `POST /v1/reservations/commit` - settle a token with actual usage
//! - `POST /v1/reservations/release` - return a token's reservation
//! - `GET /v1/usage` - counters and headroom for a request's scopes
//! - `GET /health` - store reachability and enforcement mode
//! - `GET /metrics` - Prometheus text
//!
//! ## Example
//!
//! ```no_run
//! use tokengate::api::{create_router, AppState};
//! use tokengate::config::TokengateConfig;
//! use tokengate::degradation::DegradationPolicy;
//! use tokengate::engine::ReservationEngine;
//! use tokengate::policy::BudgetPolicy;
//! use tokengate::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(ReservationEngine::new(
//!     Arc::new(MemoryStore::default()),
//!     BudgetPolicy::default(),
//!     DegradationPolicy::fail_open(),
//! ));
//! let state = Arc::new(AppState::new(engine, Arc::new(TokengateConfig::default())));
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8300").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every failure uses one JSON envelope:
//! ```json
//! {
//!   "error": {
//!     "message": "Budget exceeded: org:acme:day:2026-02-20 (...)",
//!     "type": "budget_error",
//!     "code": "budget_exceeded",
//!     "scopes": [ ... ]
//!   }
//! }
//! ```

pub mod error;
mod health;
mod reservations;
pub mod types;
mod usage;

pub use error::{ApiError, ApiErrorBody};
pub use types::*;

use crate::config::TokengateConfig;
use crate::engine::ReservationEngine;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Maximum request body size (1 MB). Tokens are small.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub config: Arc<TokengateConfig>,
    pub prometheus: PrometheusHandle,
    /// Server startup time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<ReservationEngine>, config: Arc<TokengateConfig>) -> Self {
        Self {
            engine,
            config,
            prometheus: crate::metrics::prometheus_handle(),
            start_time: Instant::now(),
        }
    }
}

/// Create the API router with all endpoints configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_seconds);

    Router::new()
        .route("/v1/reservations", post(reservations::reserve))
        .route("/v1/reservations/commit", post(reservations::commit))
        .route("/v1/reservations/release", post(reservations::release))
        .route("/v1/usage", get(usage::handle))
        .route("/health", get(health::handle))
        .route("/metrics", get(crate::metrics::handler::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .with_state(state)
}
