//! # Validation
//!
//! Input validation helpers. All validation runs before any transaction is
//! opened, so a rejected request can never have side effects.

use crate::error::ValidationError;
use crate::reservation::ReservationItem;
use crate::types::Address;

/// Maximum length for names, titles and free-text identifiers.
pub const MAX_NAME_LEN: usize = 200;
/// Maximum quantity per order line.
pub const MAX_LINE_QUANTITY: i64 = 10_000;
/// Maximum number of lines per order.
pub const MAX_ORDER_LINES: usize = 100;

/// Validates that a required string field is present and within bounds.
pub fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Validates a line quantity: positive and within the per-line cap.
pub fn validate_quantity(quantity: i64) -> Result<(), ValidationError> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a price/amount in minor units: never negative.
pub fn validate_amount_cents(field: &str, cents: i64) -> Result<(), ValidationError> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Validates an ISO currency code (three uppercase ASCII letters).
pub fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "expected a three-letter ISO code".to_string(),
        });
    }
    Ok(())
}

/// Validates the full set of reservation lines for an order request.
pub fn validate_order_items(items: &[ReservationItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }
    if items.len() > MAX_ORDER_LINES {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_ORDER_LINES as i64,
        });
    }
    for item in items {
        validate_required("items.productId", &item.product_id)?;
        validate_quantity(item.quantity)?;
    }
    Ok(())
}

/// Validates a shipping address: line1 and country are required.
pub fn validate_address(address: &Address) -> Result<(), ValidationError> {
    validate_required("shippingAddress.line1", &address.line1)?;
    validate_required("shippingAddress.country", &address.country)?;
    Ok(())
}
