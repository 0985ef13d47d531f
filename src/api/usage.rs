//! Usage query handler.

use super::{ApiError, AppState, UsageQuery, UsageResponse};
use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

/// GET /v1/usage - counters for the scopes a request with these
/// attributes would touch right now.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, ApiError> {
    let scopes = state
        .engine
        .scopes(&query.org_id, &query.user_id, &query.provider, &query.model)?;
    let scopes = state.engine.usage(&scopes).await?;
    Ok(Json(UsageResponse { scopes }))
}
