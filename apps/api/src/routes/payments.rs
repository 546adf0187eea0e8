//! Payment routes: initiation, lookup, and the provider webhook.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::provider::{mpesa, ChargeOutcome, ChargeRequest};
use crate::AppState;
use sokoni_core::{Money, Order, PaymentTransaction, ProviderKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Payer MSISDN, required for M-Pesa.
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub transaction: PaymentTransaction,
    /// Present when the transaction is pending with an unknown provider
    /// outcome, or when the request was an idempotent replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// `POST /api/payments` - initiate a payment for an order.
///
/// The amount always comes from the stored order; an idempotency key makes
/// retries return the existing transaction. The provider call runs under a
/// client-facing timeout: if it expires the transaction stays `pending`
/// (the charge may still complete and reconcile via webhook).
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<PaymentResponse>)> {
    let order = owned_order(&state, &user, &req.order_id).await?;

    let (tx, created) = state
        .db
        .payments()
        .initiate(&req.order_id, req.provider, req.idempotency_key.as_deref())
        .await?;

    if !created {
        return Ok((
            StatusCode::OK,
            Json(PaymentResponse {
                transaction: tx,
                note: Some("existing transaction returned for idempotency key".to_string()),
            }),
        ));
    }

    let response = match req.provider {
        // Dev provider: settle immediately, no external call
        ProviderKind::None => PaymentResponse {
            transaction: state.db.payments().settle_dev(&tx.id).await?,
            note: None,
        },

        ProviderKind::Mpesa => {
            let phone = req
                .phone
                .ok_or_else(|| ApiError::validation("phone is required for mpesa"))?;

            let charge = ChargeRequest {
                amount: Money::from_cents(tx.amount_cents),
                payer_ref: phone,
                account_ref: order.order_number.clone(),
                description: format!("Payment for {}", order.order_number),
            };

            let outcome =
                tokio::time::timeout(state.config.provider_timeout, async {
                    state.gateway.initiate_charge(&charge).await
                })
                .await;

            match outcome {
                Ok(ChargeOutcome::Accepted {
                    correlation_id,
                    amount_charged,
                    raw,
                }) => {
                    info!(tx_id = %tx.id, correlation_id = %correlation_id, "STK push accepted");
                    PaymentResponse {
                        transaction: state
                            .db
                            .payments()
                            .mark_pending(
                                &tx.id,
                                Some(&correlation_id),
                                Some(&raw),
                                Some(amount_charged.cents()),
                            )
                            .await?,
                        note: None,
                    }
                }
                Ok(ChargeOutcome::Rejected { reason, raw }) => {
                    warn!(tx_id = %tx.id, reason = %reason, "STK push rejected");
                    PaymentResponse {
                        transaction: state
                            .db
                            .payments()
                            .mark_initiation_failed(&tx.id, &reason, Some(&raw))
                            .await?,
                        note: None,
                    }
                }
                // Unknown outcome or timeout: the charge may still be in
                // flight, so the transaction stays pending
                Ok(ChargeOutcome::Unknown { reason }) => {
                    warn!(tx_id = %tx.id, reason = %reason, "Provider outcome unknown");
                    PaymentResponse {
                        transaction: state
                            .db
                            .payments()
                            .mark_pending(&tx.id, None, None, None)
                            .await?,
                        note: Some("provider outcome unknown; transaction pending".to_string()),
                    }
                }
                Err(_) => {
                    warn!(tx_id = %tx.id, "Provider call timed out");
                    PaymentResponse {
                        transaction: state
                            .db
                            .payments()
                            .mark_pending(&tx.id, None, None, None)
                            .await?,
                        note: Some("provider timed out; transaction pending".to_string()),
                    }
                }
            }
        }
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /api/payments/{id}` - owner (via the order) or admin.
pub async fn get(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<PaymentTransaction>> {
    let tx = state
        .db
        .payments()
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("PaymentTransaction", &id))?;

    // Ownership is derived from the order; foreign transactions read as
    // absent rather than forbidden
    owned_order(&state, &user, &tx.order_id)
        .await
        .map_err(|_| ApiError::not_found("PaymentTransaction", &id))?;

    Ok(Json(tx))
}

/// `POST /api/payments/webhook/mpesa` - Daraja STK callback.
///
/// `400` only for malformed payloads. Anything that parsed is `200
/// {ok:true}` once reconciliation ran - unknown correlation ids and
/// duplicate deliveries included, so the provider stops retrying.
pub async fn mpesa_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let callback = mpesa::parse_stk_callback(&payload)
        .ok_or_else(|| ApiError::validation("Invalid mpesa callback"))?;

    let outcome = state.db.payments().reconcile(&callback).await?;
    info!(correlation_id = %callback.correlation_id, ?outcome, "Webhook reconciled");

    Ok(Json(json!({ "ok": true })))
}

/// Loads the order scoped to the caller (admins see everything).
async fn owned_order(state: &AppState, user: &CurrentUser, order_id: &str) -> ApiResult<Order> {
    let order = if user.is_admin() {
        state.db.orders().get_by_id(order_id).await?
    } else {
        state.db.orders().get_for_user(order_id, &user.id).await?
    };

    order.ok_or_else(|| ApiError::not_found("Order", order_id))
}
