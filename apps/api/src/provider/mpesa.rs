//! M-Pesa (Daraja) gateway: OAuth + STK push, and callback parsing.
//!
//! Minor-unit conversion happens here and only here: charges go out as
//! whole KES, callback amounts come back as KES and are normalized to
//! cents before the ledger compares anything.
//!
//! In `stub` mode (the default for dev) no network calls are made; the
//! push is accepted immediately with a generated correlation id, matching
//! how a sandbox STK push behaves from the caller's point of view.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MpesaConfig;
use crate::provider::{ChargeOutcome, ChargeRequest, PaymentGateway};
use sokoni_core::{Money, ProviderCallback};

/// Daraja STK push gateway.
pub struct DarajaGateway {
    http: Client,
    config: MpesaConfig,
}

impl DarajaGateway {
    pub fn new(config: MpesaConfig) -> Self {
        DarajaGateway {
            http: Client::new(),
            config,
        }
    }

    /// Fetches an OAuth bearer token (client-credentials grant).
    async fn access_token(&self) -> Result<String, String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("token request returned {}", response.status()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("token response unparseable: {e}"))?;
        Ok(body.access_token)
    }
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn initiate_charge(&self, request: &ChargeRequest) -> ChargeOutcome {
        let kes = cents_to_kes(request.amount);
        let amount_charged = Money::from_cents(kes * 100);

        if self.config.is_stub() {
            let correlation_id = format!("stub-checkout-{}", Uuid::new_v4());
            debug!(correlation_id = %correlation_id, "Stub STK push accepted");
            return ChargeOutcome::Accepted {
                raw: json!({
                    "MerchantRequestID": format!("stub-merchant-{}", Uuid::new_v4()),
                    "CheckoutRequestID": correlation_id,
                    "ResponseCode": "0",
                    "CustomerMessage": "Success. Request accepted for processing",
                }),
                correlation_id,
                amount_charged,
            };
        }

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(reason) => {
                warn!(reason = %reason, "Daraja OAuth failed");
                return ChargeOutcome::Unknown { reason };
            }
        };

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = BASE64.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ));

        let payload = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": kes,
            "PartyA": request.payer_ref,
            "PartyB": self.config.shortcode,
            "PhoneNumber": request.payer_ref,
            "CallBackURL": self.config.callback_url,
            "AccountReference": request.account_ref,
            "TransactionDesc": request.description,
        });

        let response = match self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url
            ))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // The request may have reached Safaricom; outcome unknown
                warn!(error = %e, "STK push transport failure");
                return ChargeOutcome::Unknown {
                    reason: format!("stk push transport failure: {e}"),
                };
            }
        };

        let raw: Value = match response.json().await {
            Ok(raw) => raw,
            Err(e) => {
                return ChargeOutcome::Unknown {
                    reason: format!("stk push response unparseable: {e}"),
                }
            }
        };

        let response_code = raw
            .get("ResponseCode")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let checkout_request_id = raw.get("CheckoutRequestID").and_then(Value::as_str);

        match (response_code, checkout_request_id) {
            ("0", Some(correlation_id)) => ChargeOutcome::Accepted {
                correlation_id: correlation_id.to_string(),
                amount_charged,
                raw: raw.clone(),
            },
            _ => {
                let reason = raw
                    .get("errorMessage")
                    .or_else(|| raw.get("ResponseDescription"))
                    .and_then(Value::as_str)
                    .unwrap_or("STK push rejected")
                    .to_string();
                ChargeOutcome::Rejected { reason, raw }
            }
        }
    }
}

// =============================================================================
// Unit conversion
// =============================================================================

/// Daraja takes whole KES; round to the nearest shilling.
fn cents_to_kes(amount: Money) -> i64 {
    (amount.cents() + 50) / 100
}

fn kes_to_cents(kes: f64) -> i64 {
    (kes * 100.0).round() as i64
}

// =============================================================================
// Callback parsing
// =============================================================================

/// Parses a Daraja STK callback (`Body.stkCallback`) into the normalized
/// shape the ledger reconciles with. Returns `None` when the payload is
/// malformed (the webhook answers 400 in that case).
pub fn parse_stk_callback(payload: &Value) -> Option<ProviderCallback> {
    let stk = payload.get("Body")?.get("stkCallback")?;

    let correlation_id = stk.get("CheckoutRequestID")?.as_str()?.to_string();
    let result_code = stk.get("ResultCode")?.as_i64()?;
    let success = result_code == 0;

    let mut amount_cents = None;
    let mut receipt = None;

    if let Some(items) = stk
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(Value::as_array)
    {
        for item in items {
            match item.get("Name").and_then(Value::as_str) {
                Some("Amount") => {
                    amount_cents = item.get("Value").and_then(Value::as_f64).map(kes_to_cents);
                }
                Some("MpesaReceiptNumber") => {
                    receipt = item
                        .get("Value")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                _ => {}
            }
        }
    }

    let failure_reason = (!success)
        .then(|| stk.get("ResultDesc").and_then(Value::as_str).map(str::to_string))
        .flatten();

    Some(ProviderCallback {
        correlation_id,
        success,
        amount_cents,
        receipt,
        failure_reason,
        raw: payload.clone(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn success_payload() -> Value {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 3300.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "PhoneNumber", "Value": 254700000001u64 }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_success_callback() {
        let cb = parse_stk_callback(&success_payload()).unwrap();
        assert_eq!(cb.correlation_id, "ws_CO_191220191020363925");
        assert!(cb.success);
        assert_eq!(cb.amount_cents, Some(3300_00));
        assert_eq!(cb.receipt.as_deref(), Some("NLJ7RT61SV"));
        assert!(cb.failure_reason.is_none());
    }

    #[test]
    fn test_parse_failure_callback() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let cb = parse_stk_callback(&payload).unwrap();
        assert!(!cb.success);
        assert_eq!(cb.amount_cents, None);
        assert_eq!(cb.failure_reason.as_deref(), Some("Request cancelled by user"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_stk_callback(&json!({"foo": "bar"})).is_none());
        assert!(parse_stk_callback(&json!({"Body": {"stkCallback": {}}})).is_none());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(cents_to_kes(Money::from_cents(3300_00)), 3300);
        assert_eq!(cents_to_kes(Money::from_cents(1049)), 10);
        assert_eq!(cents_to_kes(Money::from_cents(1050)), 11);
        assert_eq!(kes_to_cents(3300.0), 3300_00);
    }

    #[tokio::test]
    async fn test_stub_mode_accepts_without_network() {
        let gateway = DarajaGateway::new(MpesaConfig {
            environment: "stub".into(),
            base_url: "https://example.invalid".into(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            shortcode: "174379".into(),
            passkey: String::new(),
            callback_url: "http://localhost/cb".into(),
        });

        let outcome = gateway
            .initiate_charge(&ChargeRequest {
                amount: Money::from_cents(3300_00),
                payer_ref: "254700000001".into(),
                account_ref: "ORD-2026-000001".into(),
                description: "Order payment".into(),
            })
            .await;

        match outcome {
            ChargeOutcome::Accepted {
                correlation_id,
                amount_charged,
                ..
            } => {
                assert!(correlation_id.starts_with("stub-checkout-"));
                assert_eq!(amount_charged, Money::from_cents(3300_00));
            }
            other => panic!("expected accepted, got {other:?}"),
        }
    }
}
