//! # sokoni-db: Storage Layer
//!
//! SQLite persistence for the Sokoni commerce backend: connection pooling,
//! embedded migrations, and the transactional repositories.
//!
//! ## Architecture Position
//! ```text
//!  apps/api (axum handlers)
//!        │
//!        ▼
//!  sokoni-db (THIS CRATE)
//!  ├── pool        Connection pool + Database handle
//!  ├── migrations  Embedded schema migrations
//!  └── repository
//!      ├── product    Catalog CRUD, SKU/slug generation
//!      ├── inventory  Reservation engine (reserve / restock)
//!      ├── order      Order store + creation/cancel transactions
//!      ├── payment    Payment transaction ledger + reconciliation
//!      └── shipping   Shipping rate resolution
//!        │
//!        ▼
//!  SQLite (WAL mode)
//! ```
//!
//! ## Consistency Model
//!
//! Every multi-step mutation (create order, cancel order, reconcile a
//! payment) runs inside a single SQLite transaction. SQLite's single-writer
//! model means two checkouts for the last unit serialize; the loser's
//! guarded decrement misses and its whole transaction rolls back.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(test)]
pub(crate) mod test_util;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::inventory::StockAdjustment;
pub use repository::order::{NewOrder, OrderRepository};
pub use repository::payment::{PaymentRepository, ReconcileOutcome};
pub use repository::product::{NewProduct, NewVariant, ProductRepository};
pub use repository::shipping::{NewShippingRate, ShippingRepository};
