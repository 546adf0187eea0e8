//! # Reservation Types
//!
//! Request/failure shapes for the reservation engine, plus the pure
//! availability check both the engine and its tests share.
//!
//! The engine itself lives in `sokoni-db` because reservation is
//! inherently transactional; what lives here is everything that can be
//! stated without I/O: what a reservation asks for, how a failure is
//! described, and the arithmetic that decides whether a quantity is
//! available.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Request
// =============================================================================

/// One line of a reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReservationItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    /// Draw from a specific stock location when given.
    pub location: Option<String>,
}

// =============================================================================
// Failure
// =============================================================================

/// Why a single item could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    /// Product or variant does not exist (or is inactive).
    NotFound,
    /// Requested quantity exceeds what is available and backorder is off.
    InsufficientStock { available: i64, requested: i64 },
}

/// A failed reservation line. The engine aborts the whole reservation and
/// returns the complete list of these, so the caller can render a single
/// error message instead of partial failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFailure {
    pub product_id: String,
    pub variant_id: Option<String>,
    #[serde(flatten)]
    pub reason: FailureReason,
}

impl std::fmt::Display for ReservationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            FailureReason::NotFound => write!(f, "{}: not found", self.product_id),
            FailureReason::InsufficientStock {
                available,
                requested,
            } => write!(
                f,
                "{}: insufficient stock (available {}, requested {})",
                self.product_id, available, requested
            ),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// What the engine learned about a line while validating it: the frozen
/// name/sku/price the order snapshot is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSnapshot {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub name: String,
    pub sku: Option<String>,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub location: Option<String>,
}

// =============================================================================
// Availability
// =============================================================================

/// The availability rule, in one place.
///
/// Backorder-enabled stock is always available (it may go negative);
/// otherwise the requested quantity must not exceed what is on hand.
#[inline]
pub fn is_available(stock: i64, allow_backorder: bool, requested: i64) -> bool {
    allow_backorder || stock >= requested
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability() {
        assert!(is_available(5, false, 5));
        assert!(!is_available(4, false, 5));
        assert!(is_available(0, true, 5));
        assert!(is_available(-3, true, 1));
        assert!(!is_available(0, false, 1));
    }

    #[test]
    fn test_failure_display() {
        let fail = ReservationFailure {
            product_id: "P2".into(),
            variant_id: None,
            reason: FailureReason::InsufficientStock {
                available: 4,
                requested: 10,
            },
        };
        assert_eq!(
            fail.to_string(),
            "P2: insufficient stock (available 4, requested 10)"
        );
    }

    #[test]
    fn test_failure_serializes_flat() {
        let fail = ReservationFailure {
            product_id: "P1".into(),
            variant_id: None,
            reason: FailureReason::NotFound,
        };
        let json = serde_json::to_value(&fail).unwrap();
        assert_eq!(json["reason"], "not_found");
        assert_eq!(json["productId"], "P1");
    }
}
