//! # Error Types
//!
//! Domain-specific error taxonomy, following the propagation chain:
//!
//! ```text
//!   ValidationError ─► CoreError ─► DbError (sokoni-db) ─► ApiError (api)
//! ```
//!
//! ## Design Principles
//! 1. `thiserror` derive macros, never manual impls
//! 2. Context in the message (ids, quantities) so logs are actionable
//! 3. Errors are enum variants, never bare Strings
//! 4. Conflicts carry enough detail for the caller to act (which item
//!    failed, which transition was refused)

use thiserror::Error;

use crate::order::OrderStatus;
use crate::reservation::ReservationFailure;

// =============================================================================
// Core Error
// =============================================================================

/// Business-rule violations and domain logic failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found (absent or soft-deleted).
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Order cannot be found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Payment transaction cannot be found.
    #[error("Payment transaction not found: {0}")]
    TransactionNotFound(String),

    /// One or more items could not be reserved. Carries the complete list
    /// of failing lines; the whole reservation was rolled back.
    #[error("Reservation failed: {}", format_failures(.0))]
    ReservationFailed(Vec<ReservationFailure>),

    /// The order state machine refused a transition.
    #[error("Order {order_id} is {from:?}, cannot transition to {to:?}")]
    InvalidOrderStatus {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Payment was requested for an order that is not payable.
    #[error("Order {order_id} is {status:?}, not payable")]
    OrderNotPayable {
        order_id: String,
        status: OrderStatus,
    },

    /// A provider reported an amount that differs from the ledger amount.
    #[error("Amount mismatch: expected {expected} got {reported}")]
    AmountMismatch { expected: i64, reported: i64 },

    /// Unrecognized status string from storage or the wire.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// Provider name the ledger does not support.
    #[error("Unsupported payment provider: {0}")]
    UnsupportedProvider(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

fn format_failures(failures: &[ReservationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors, raised before any transaction starts so a bad
/// request can never have side effects.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be a positive integer.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (bad id, bad currency code, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g. duplicate SKU).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::FailureReason;

    #[test]
    fn test_reservation_error_lists_all_items() {
        let err = CoreError::ReservationFailed(vec![
            ReservationFailure {
                product_id: "P1".into(),
                variant_id: None,
                reason: FailureReason::NotFound,
            },
            ReservationFailure {
                product_id: "P2".into(),
                variant_id: None,
                reason: FailureReason::InsufficientStock {
                    available: 4,
                    requested: 10,
                },
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("P1: not found"));
        assert!(msg.contains("P2: insufficient stock"));
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "items".to_string(),
        };
        assert_eq!(err.to_string(), "items is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
