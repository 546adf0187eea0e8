//! Shipping quote and rate management routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{AdminUser, CurrentUser};
use crate::error::ApiResult;
use crate::AppState;
use sokoni_core::{Address, Money, ShippingRate};
use sokoni_db::NewShippingRate;

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub address: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub fee_cents: i64,
    pub currency: String,
}

/// `POST /api/shipping/quote` - fee for an address, most specific rate
/// first, falling back to the configured default.
pub async fn quote(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<QuoteRequest>,
) -> ApiResult<Json<QuoteResponse>> {
    let fee = state
        .db
        .shipping()
        .quote(
            &req.address,
            Money::from_cents(state.config.default_shipping_fee_cents),
        )
        .await?;

    Ok(Json(QuoteResponse {
        fee_cents: fee.cents(),
        currency: sokoni_core::DEFAULT_CURRENCY.to_string(),
    }))
}

/// `GET /api/shipping/rates` (admin).
pub async fn list(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<ShippingRate>>> {
    Ok(Json(state.db.shipping().list().await?))
}

/// `POST /api/shipping/rates` (admin).
pub async fn create(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(new): Json<NewShippingRate>,
) -> ApiResult<(StatusCode, Json<ShippingRate>)> {
    let rate = state.db.shipping().insert(new).await?;
    Ok((StatusCode::CREATED, Json(rate)))
}

/// `DELETE /api/shipping/rates/{id}` (admin) - soft delete.
pub async fn deactivate(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.shipping().deactivate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
