//! Order routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::auth::{AdminUser, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::routes::Pagination;
use crate::AppState;
use sokoni_core::{Address, Money, Order, OrderStatus, ProviderKind, ReservationItem};
use sokoni_db::NewOrder;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<ReservationItem>,
    pub shipping_address: Address,
    #[serde(default)]
    pub payment: Option<PaymentMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMeta {
    pub provider: ProviderKind,
    #[serde(default)]
    pub currency: Option<String>,
}

/// `POST /api/orders` - create an order.
///
/// Stock reservation, order-number allocation and the item snapshots are
/// one transaction in the repository; a reservation conflict surfaces as
/// `409` with the full failing-item list.
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let shipping_fee = state
        .db
        .shipping()
        .quote(
            &req.shipping_address,
            Money::from_cents(state.config.default_shipping_fee_cents),
        )
        .await?;

    let (provider, currency) = match req.payment {
        Some(meta) => (meta.provider, meta.currency),
        None => (ProviderKind::None, None),
    };

    let order = state
        .db
        .orders()
        .create(NewOrder {
            user_id: user.id,
            items: req.items,
            shipping_address: req.shipping_address,
            provider,
            shipping_fee,
            currency,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /api/orders/mine` - the caller's orders, newest first.
pub async fn mine(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<Order>>> {
    let (limit, offset) = page.clamped();
    let orders = state.db.orders().list_for_user(&user.id, limit, offset).await?;
    Ok(Json(orders))
}

/// `GET /api/orders/{id}` - owner or admin.
pub async fn get(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Order>> {
    let order = if user.is_admin() {
        state.db.orders().get_by_id(&id).await?
    } else {
        state.db.orders().get_for_user(&id, &user.id).await?
    };

    order
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Order", &id))
}

/// `PATCH /api/orders/{id}/cancel` - owner-initiated cancellation.
pub async fn cancel(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Order>> {
    let requester = (!user.is_admin()).then_some(user.id.as_str());
    let order = state.db.orders().cancel(&id, requester).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// `GET /api/admin/orders` - admin listing with optional status filter.
pub async fn admin_list(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AdminListQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let orders = state
        .db
        .orders()
        .admin_list(query.status, query.limit.clamp(1, 100), query.offset.max(0))
        .await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: OrderStatus,
}

/// `PATCH /api/admin/orders/{id}/status` - admin transition. A `cancelled`
/// target routes through the stock-restoring cancellation path.
pub async fn admin_set_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> ApiResult<Json<Order>> {
    let order = state.db.orders().set_status(&id, req.status).await?;
    Ok(Json(order))
}
