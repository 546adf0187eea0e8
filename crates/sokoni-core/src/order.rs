//! # Order Aggregate
//!
//! The order is an immutable-once-created snapshot of what was purchased,
//! at what price, with computed totals, plus a status state machine:
//!
//! ```text
//!   pending ──► paid ──► processing ──► shipped ──► delivered
//!      │          │           │
//!      └──────────┴───────────┴──────► cancelled
//!                 │
//!                 └──► refunded
//! ```
//!
//! Terminal states: `delivered`, `cancelled`, `refunded`.
//!
//! Item snapshots and totals are computed exactly once at creation and are
//! never re-derived from live product data. Status changes go through
//! [`OrderStatus::can_transition`]; raw assignment bypassing the state
//! machine is a bug.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::money::Money;
use crate::payment::ProviderKind;
use crate::types::Address;

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Whether no further automatic transition can occur from this status.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Whether an order in this status accepts a new payment attempt.
    pub const fn is_payable(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Whether cancellation (with stock restore) is allowed from here.
    pub const fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Processing
        )
    }

    /// Validates a transition of the state machine.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (*self, to) {
            (Pending, Paid) => true,
            (Paid, Processing) => true,
            (Processing, Shipped) => true,
            (Shipped, Delivered) => true,
            (Pending | Paid | Processing, Cancelled) => true,
            (Paid, Refunded) => true,
            _ => false,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Payment sub-record
// =============================================================================

/// Status of the payment sub-record mirrored onto the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Payment summary embedded in the order.
///
/// The authoritative record of attempts is the payment-transaction ledger;
/// this mirror exists so reads of an order answer "is it paid?" without a
/// join, and is only ever updated together with the ledger row in the same
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderPayment {
    pub provider: ProviderKind,
    pub status: PaymentState,
    pub amount_cents: i64,
    pub currency: String,
    /// Ledger transaction id once one has settled this order.
    pub transaction_id: Option<String>,
}

// =============================================================================
// Order Item
// =============================================================================

/// A line item, frozen at creation time (snapshot pattern).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    /// Reference back to the product, for lookups only - never re-read for
    /// pricing.
    pub product_id: String,
    pub variant_id: Option<String>,
    /// Product name at time of purchase (frozen).
    pub name: String,
    /// SKU at time of purchase (frozen).
    pub sku: Option<String>,
    /// Unit price in minor units at time of purchase (frozen).
    pub unit_price_cents: i64,
    pub quantity: i64,
    /// Stock location the quantity was drawn from, when location-scoped.
    pub location: Option<String>,
}

impl OrderItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Price breakdown, all in minor units of the order currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub sub_total_cents: i64,
    pub shipping_fee_cents: i64,
    pub tax_total_cents: i64,
    pub discount_total_cents: i64,
    pub total_cents: i64,
}

impl OrderTotals {
    /// Computes totals from item snapshots plus the fees decided at creation.
    ///
    /// `total = max(0, sub_total + shipping + tax - discount)`. Totals are
    /// computed here once; nothing recomputes them from live product data.
    pub fn compute(items: &[OrderItem], shipping_fee: Money, tax: Money, discount: Money) -> Self {
        let sub_total: Money = items.iter().map(OrderItem::line_total).sum();
        let total = (sub_total + shipping_fee + tax - discount).floor_at_zero();
        OrderTotals {
            sub_total_cents: sub_total.cents(),
            shipping_fee_cents: shipping_fee.cents(),
            tax_total_cents: tax.cents(),
            discount_total_cents: discount.cents(),
            total_cents: total.cents(),
        }
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Order
// =============================================================================

/// The order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// Human-readable sequence number, e.g. `ORD-2026-000042`.
    pub order_number: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub currency: String,
    pub payment: OrderPayment,
    pub shipping_address: Address,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates a status transition, returning a conflict error when the
    /// state machine forbids it.
    pub fn ensure_transition(&self, to: OrderStatus) -> Result<(), CoreError> {
        if self.status.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidOrderStatus {
                order_id: self.id.clone(),
                from: self.status,
                to,
            })
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
