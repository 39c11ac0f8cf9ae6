//! API error types mapped to HTTP status codes.
//!
//! Every failure renders as `{"ok": false, ...}`:
//!
//! - `Validation` → 400 with `errors: [{parameter, error}]`
//! - `HomeLocationRequired` → 400 with `error: "home_location_required"`
//! - `AnalyticsTimeout` → 504 with `error: "analytics_timeout"`
//! - `Internal` → 500 with `error: "internal_error"`

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::storage::StorageError;
use crate::validation::ValidationErrors;

#[derive(Debug)]
pub enum ApiError {
    /// The request payload failed validation (400).
    Validation(ValidationErrors),
    /// A distance-from-home filter is enabled but no home is set (400).
    HomeLocationRequired,
    /// The analytics bundle exceeded its time budget (504).
    AnalyticsTimeout(String),
    /// Unexpected storage fault (500).
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::HomeLocationRequired => StatusCode::BAD_REQUEST,
            ApiError::AnalyticsTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::AnalyticsTimeout(_) => ApiError::AnalyticsTimeout(error.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(errors) => json!({
                "ok": false,
                "errors": errors.errors,
            }),
            ApiError::HomeLocationRequired => json!({
                "ok": false,
                "error": "home_location_required",
                "message": "Distance filters need a home location marker",
            }),
            ApiError::AnalyticsTimeout(message) => json!({
                "ok": false,
                "error": "analytics_timeout",
                "message": message,
            }),
            ApiError::Internal(message) => json!({
                "ok": false,
                "error": "internal_error",
                "message": message,
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_storage_errors_map_to_status() {
        let timeout: ApiError = StorageError::AnalyticsTimeout(Duration::from_secs(10)).into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        let ApiError::AnalyticsTimeout(message) = &timeout else {
            panic!("expected analytics timeout, got {timeout:?}");
        };
        assert!(message.contains("narrow the time window"));

        let internal: ApiError = StorageError::Database(sqlx::Error::RowNotFound).into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ApiError::HomeLocationRequired.status(), StatusCode::BAD_REQUEST);
    }
}
