//! API error envelope and [`BudgetError`] status mapping.

use crate::engine::{BudgetError, ExhaustedScope};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

/// Error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

/// Error details.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub message: String,
    pub r#type: String,
    pub code: String,
    /// Exhausted scopes for `budget_exceeded`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ExhaustedScope>,
}

impl ApiError {
    fn new(message: impl Into<String>, r#type: &str, code: &str) -> Self {
        Self {
            error: ApiErrorBody {
                message: message.into(),
                r#type: r#type.to_string(),
                code: code.to_string(),
                scopes: Vec::new(),
            },
        }
    }

    /// Create a bad request error (400).
    pub fn bad_request(message: &str) -> Self {
        Self::new(message, "invalid_request_error", "invalid_request_error")
    }

    /// Create a service unavailable error (503).
    pub fn service_unavailable(message: &str) -> Self {
        Self::new(message, "server_error", "service_unavailable")
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.error.code.as_str() {
            "budget_exceeded" => StatusCode::TOO_MANY_REQUESTS,
            "invalid_request_error" | "invalid_scope" => StatusCode::BAD_REQUEST,
            "reservation_not_found" => StatusCode::NOT_FOUND,
            "service_unavailable" | "store_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds until the last exhausted window resets.
    fn retry_after(&self) -> Option<i64> {
        let latest = self.error.scopes.iter().filter_map(|s| s.resets_at).max()?;
        Some((latest - Utc::now()).num_seconds().max(1))
    }
}

impl From<BudgetError> for ApiError {
    fn from(err: BudgetError) -> Self {
        let message = err.to_string();
        match err {
            BudgetError::BudgetExceeded { scopes } => {
                let mut api = Self::new(message, "budget_error", "budget_exceeded");
                api.error.scopes = scopes;
                api
            }
            BudgetError::PolicyNotFound { .. } => {
                Self::new(message, "configuration_error", "policy_not_found")
            }
            BudgetError::StoreUnavailable(_) => {
                Self::new(message, "server_error", "store_unavailable")
            }
            BudgetError::CommitFailed { .. } => Self::new(message, "server_error", "commit_failed"),
            BudgetError::ReleaseFailed { .. } => {
                Self::new(message, "server_error", "release_failed")
            }
            BudgetError::ReservationNotFound { .. } => {
                Self::new(message, "invalid_request_error", "reservation_not_found")
            }
            BudgetError::InvalidScope(_) => {
                Self::new(message, "invalid_request_error", "invalid_scope")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after();
        let mut response = (status, Json(self)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeKey, ScopeType, Window};
    use crate::store::StoreError;

    fn exceeded() -> BudgetError {
        let scope = ScopeKey::new(ScopeType::Org, "acme", Window::PerDay, Utc::now()).unwrap();
        BudgetError::BudgetExceeded {
            scopes: vec![ExhaustedScope {
                resets_at: scope.resets_at(),
                scope,
                used: 60,
                reserved: 0,
                requested: 50,
                limit: 100,
            }],
        }
    }

    #[test]
    fn test_budget_exceeded_is_429_with_retry_after() {
        let response = ApiError::from(exceeded()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: i64 = response
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry >= 1 && retry <= 86_400);
    }

    #[test]
    fn test_exceeded_body_lists_scopes() {
        let json = serde_json::to_value(ApiError::from(exceeded())).unwrap();
        assert_eq!(json["error"]["code"], "budget_exceeded");
        assert_eq!(json["error"]["scopes"][0]["limit"], 100);
        assert_eq!(json["error"]["scopes"][0]["scope"]["scope_type"], "org");
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                BudgetError::StoreUnavailable(StoreError::Connection("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BudgetError::PolicyNotFound {
                    scope: "user:alice:day:2026-02-20".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BudgetError::ReservationNotFound {
                    reservation_id: "r1".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                BudgetError::CommitFailed {
                    reservation_id: "r1".into(),
                    source: StoreError::Connection("down".into()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_bad_request_has_no_scopes_field() {
        let json = serde_json::to_value(ApiError::bad_request("Invalid JSON")).unwrap();
        assert_eq!(json["error"]["code"], "invalid_request_error");
        assert!(json["error"].get("scopes").is_none());
    }
}
