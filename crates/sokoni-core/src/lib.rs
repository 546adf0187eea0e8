//! # sokoni-core: Pure Business Logic
//!
//! Domain types and business rules for the Sokoni commerce backend, as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//!  ┌──────────────────────────────────────────────┐
//!  │               apps/api (axum)                │
//!  │   orders, payments, products, webhooks       │
//!  └──────────────────────┬───────────────────────┘
//!                         │
//!  ┌──────────────────────▼───────────────────────┐
//!  │           ★ sokoni-core (THIS CRATE) ★       │
//!  │                                              │
//!  │   types • money • order • payment •          │
//!  │   reservation • validation • error           │
//!  │                                              │
//!  │   NO I/O • NO DATABASE • NO NETWORK          │
//!  └──────────────────────┬───────────────────────┘
//!                         │
//!  ┌──────────────────────▼───────────────────────┐
//!  │          sokoni-db (SQLite layer)            │
//!  │   reservation engine, order store, ledger    │
//!  └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Catalog types (Product, Variant, StockLevel, Address)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`order`] - Order aggregate and its status state machine
//! - [`payment`] - Payment transaction ledger types
//! - [`reservation`] - Reservation request/failure shapes
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: deterministic, no side effects
//! 2. **Integer Money**: all monetary values are minor units (i64)
//! 3. **Explicit State Machines**: status changes are validated transitions
//! 4. **Explicit Errors**: typed errors, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod order;
pub mod payment;
pub mod reservation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use order::{Order, OrderItem, OrderPayment, OrderStatus, OrderTotals, PaymentState};
pub use payment::{PaymentTransaction, ProviderCallback, ProviderKind, TxStatus};
pub use reservation::{FailureReason, LineSnapshot, ReservationFailure, ReservationItem};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default currency for amounts when nothing else is configured.
pub const DEFAULT_CURRENCY: &str = "KES";

/// Prefix for generated order numbers (`ORD-YYYY-NNNNNN`).
pub const ORDER_NUMBER_PREFIX: &str = "ORD";

/// Prefix for generated SKUs (`SKU-YYYY-NNNNN`).
pub const SKU_PREFIX: &str = "SKU";
