//! # sokoni-api: HTTP surface
//!
//! axum server over the sokoni repositories:
//!
//! ```text
//!  clients ──► axum router
//!                ├── /api/orders      order creation/cancel/status
//!                ├── /api/payments    ledger + provider dispatch + webhook
//!                ├── /api/products    catalog
//!                ├── /api/shipping    quotes + rates
//!                └── /health
//!                      │
//!                      ▼
//!              sokoni-db repositories ──► SQLite
//! ```
//!
//! Handlers are thin: they authenticate, shape requests, and delegate to
//! the repositories, which own every transaction.

pub mod auth;
pub mod config;
pub mod error;
pub mod provider;
pub mod routes;

use std::sync::Arc;

use crate::config::ApiConfig;
use crate::provider::PaymentGateway;
use sokoni_db::Database;

/// Shared application state. Cloned per request; everything inside is
/// cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<ApiConfig>,
    pub gateway: Arc<dyn PaymentGateway>,
}

/// Builds the full application router.
pub fn router(state: AppState) -> axum::Router {
    routes::router(state)
}
