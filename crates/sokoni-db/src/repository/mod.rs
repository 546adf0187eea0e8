//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Repository Pattern
//! Each repository wraps the pool behind a focused API; SQL never leaks
//! into handlers. Multi-step mutations open one transaction and either
//! commit everything or nothing.
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog CRUD, SKU/slug generation
//! - [`order::OrderRepository`] - Order store: create (with reservation),
//!   cancel (with restock), status transitions
//! - [`payment::PaymentRepository`] - Payment transaction ledger and
//!   reconciliation
//! - [`shipping::ShippingRepository`] - Shipping rate resolution
//!
//! The reservation engine itself lives in [`inventory`] as transaction-
//! scoped functions; it never commits on its own.

pub mod counters;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod product;
pub mod shipping;
