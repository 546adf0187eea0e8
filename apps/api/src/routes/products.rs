//! Catalog routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::Pagination;
use crate::AppState;
use sokoni_core::Product;
use sokoni_db::{NewProduct, StockAdjustment};

/// `GET /api/products` - public listing of active products.
pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<Product>>> {
    let (limit, offset) = page.clamped();
    let products = state.db.products().list(limit, offset).await?;
    Ok(Json(products))
}

/// `GET /api/products/{id}` - by id, falling back to slug lookup so
/// storefront URLs work directly.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Product>> {
    let products = state.db.products();
    let product = match products.get_by_id(&id).await? {
        Some(product) => Some(product),
        None => products.get_by_slug(&id).await?,
    };

    product
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Product", &id))
}

/// `POST /api/products` (admin).
pub async fn create(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(new): Json<NewProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let product = state.db.products().insert(new).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Debug, serde::Deserialize)]
pub struct RestockRequest {
    pub adjustments: Vec<StockAdjustment>,
}

/// `POST /api/products/{id}/stock` (admin) - bulk stock adjustment.
pub async fn restock(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(req): Json<RestockRequest>,
) -> ApiResult<Json<Product>> {
    if req.adjustments.is_empty() {
        return Err(ApiError::validation("adjustments is required"));
    }
    let product = state.db.products().restock(&id, &req.adjustments).await?;
    Ok(Json(product))
}
