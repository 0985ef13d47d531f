//! Reservation handlers.

use super::{
    ApiError, AppState, CommitRequest, ReleaseRequest, ReleaseResponse, ReserveRequest,
    ReserveResponse,
};
use crate::engine::CommitOutcome;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

/// POST /v1/reservations
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReserveResponse>), ApiError> {
    let scopes = state.engine.scopes(
        &request.org_id,
        &request.user_id,
        &request.provider,
        &request.model,
    )?;
    let token = state
        .engine
        .reserve(scopes, request.estimated_tokens)
        .await?;

    Ok((StatusCode::CREATED, Json(ReserveResponse { token })))
}

/// POST /v1/reservations/commit
pub async fn commit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitOutcome>, ApiError> {
    let outcome = state
        .engine
        .commit(request.token, request.actual_tokens)
        .await?;
    Ok(Json(outcome))
}

/// POST /v1/reservations/release
pub async fn release(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let reservation_id = request.token.id().to_string();
    state.engine.release(request.token).await?;
    Ok(Json(ReleaseResponse {
        reservation_id,
        released: true,
    }))
}
