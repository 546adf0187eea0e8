//! # API Error Type
//!
//! Unified error type for HTTP handlers.
//!
//! ## Serialization
//! This is the body clients receive when a request fails:
//! ```json
//! {
//!   "code": "CONFLICT",
//!   "message": "Reservation failed: P2: insufficient stock (available 1, requested 5)",
//!   "details": [ { "productId": "P2", "reason": "insufficient_stock", ... } ]
//! }
//! ```
//!
//! Internals (SQL text, provider payloads) are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sokoni_core::CoreError;
use sokoni_db::DbError;

/// API error returned from HTTP handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,

    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,

    /// Structured context (e.g. the full failing-item list on a
    /// reservation conflict).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input validation failed (400)
    ValidationError,

    /// Missing or invalid bearer token (401)
    Unauthorized,

    /// Authenticated but not allowed (403)
    Forbidden,

    /// Resource not found (404)
    NotFound,

    /// State conflict: insufficient stock, refused transition, duplicate (409)
    Conflict,

    /// Upstream payment provider failed (502)
    ExternalDependency,

    /// Internal server error (500)
    Internal,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a not found error.
    pub fn not_found(resource: &str, id: &str) -> Self {
        ApiError::new(
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            format!("{resource} not found: {id}"),
        )
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, ErrorCode::ValidationError, message)
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, message)
    }

    /// Creates a forbidden error.
    pub fn forbidden() -> Self {
        ApiError::new(
            StatusCode::FORBIDDEN,
            ErrorCode::Forbidden,
            "Admin role required",
        )
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::CONFLICT, ErrorCode::Conflict, message)
    }

    /// Creates an internal error with a generic client message.
    pub fn internal() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            "Internal server error",
        )
    }

    /// Attaches structured detail context.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Converts core errors to API errors.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProductNotFound(id) => ApiError::not_found("Product", &id),
            CoreError::OrderNotFound(id) => ApiError::not_found("Order", &id),
            CoreError::TransactionNotFound(id) => ApiError::not_found("PaymentTransaction", &id),

            CoreError::ReservationFailed(ref failures) => {
                let details = serde_json::to_value(failures).unwrap_or_default();
                ApiError::conflict(err.to_string()).with_details(details)
            }

            CoreError::InvalidOrderStatus { .. } | CoreError::OrderNotPayable { .. } => {
                ApiError::conflict(err.to_string())
            }

            CoreError::AmountMismatch { .. } => ApiError::conflict(err.to_string()),

            CoreError::UnknownStatus(_) | CoreError::UnsupportedProvider(_) => {
                ApiError::validation(err.to_string())
            }

            CoreError::Validation(v) => ApiError::validation(v.to_string()),
        }
    }
}

/// Converts database errors to API errors.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ApiError::not_found(&entity, &id),

            DbError::UniqueViolation { field, value } => {
                ApiError::conflict(format!("{field} '{value}' already exists"))
            }

            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {message}");
                ApiError::validation("Invalid reference")
            }

            DbError::Core(core) => core.into(),

            other => {
                // Log the actual error but return a generic message
                tracing::error!("Database error: {other}");
                ApiError::internal()
            }
        }
    }
}

/// Result type for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sokoni_core::{FailureReason, ReservationFailure};

    #[test]
    fn test_reservation_failure_maps_to_conflict_with_details() {
        let err: ApiError = CoreError::ReservationFailed(vec![ReservationFailure {
            product_id: "P2".into(),
            variant_id: None,
            reason: FailureReason::InsufficientStock {
                available: 1,
                requested: 5,
            },
        }])
        .into();

        assert_eq!(err.status, StatusCode::CONFLICT);
        let details = err.details.unwrap();
        assert_eq!(details[0]["productId"], "P2");
        assert_eq!(details[0]["reason"], "insufficient_stock");
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err: ApiError = DbError::QueryFailed("secret sql".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("secret"));
    }

    #[test]
    fn test_not_found_maps_404() {
        let err: ApiError = DbError::not_found("Order", "o1").into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
