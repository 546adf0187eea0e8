//! Route assembly.

pub mod health;
pub mod orders;
pub mod payments;
pub mod products;
pub mod shipping;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Catalog
        .route("/api/products", get(products::list).post(products::create))
        .route("/api/products/{id}", get(products::get))
        .route("/api/products/{id}/stock", post(products::restock))
        // Orders
        .route("/api/orders", post(orders::create))
        .route("/api/orders/mine", get(orders::mine))
        .route("/api/orders/{id}", get(orders::get))
        .route("/api/orders/{id}/cancel", patch(orders::cancel))
        .route("/api/admin/orders", get(orders::admin_list))
        .route("/api/admin/orders/{id}/status", patch(orders::admin_set_status))
        // Payments
        .route("/api/payments", post(payments::create))
        .route("/api/payments/{id}", get(payments::get))
        .route("/api/payments/webhook/mpesa", post(payments::mpesa_webhook))
        // Shipping
        .route("/api/shipping/quote", post(shipping::quote))
        .route("/api/shipping/rates", get(shipping::list).post(shipping::create))
        .route("/api/shipping/rates/{id}", axum::routing::delete(shipping::deactivate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Common pagination query parameters.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Pagination {
    /// Clamps to sane bounds so a query can't ask for the whole table.
    pub fn clamped(self) -> (i64, i64) {
        (self.limit.clamp(1, 100), self.offset.max(0))
    }
}
