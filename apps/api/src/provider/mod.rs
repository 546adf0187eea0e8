//! Payment provider adapters.
//!
//! The ledger reasons only about normalized shapes; everything
//! provider-specific (auth, payload formats, currency unit conversion)
//! stays behind [`PaymentGateway`].

pub mod mpesa;

use async_trait::async_trait;
use serde_json::Value;

use sokoni_core::Money;

/// A charge request handed to a gateway.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Amount in minor units; the gateway converts to its own unit.
    pub amount: Money,
    /// Payer reference, e.g. the MSISDN for an STK push.
    pub payer_ref: String,
    /// Merchant-side reference shown to the payer (the order number).
    pub account_ref: String,
    /// Free-text description.
    pub description: String,
}

/// What came back from the provider's initiation endpoint.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    /// Provider accepted the request; settlement arrives via callback.
    Accepted {
        /// Provider request id to correlate the callback with.
        correlation_id: String,
        /// What the provider will actually collect, in minor units. Differs
        /// from the requested amount when the provider's currency unit is
        /// coarser (M-Pesa charges whole KES); the ledger records this so
        /// the callback amount reconciles against the real charge.
        amount_charged: Money,
        raw: Value,
    },
    /// Provider explicitly rejected the request.
    Rejected { reason: String, raw: Value },
    /// Transport error or unparseable response; the charge may or may not
    /// be in flight provider-side.
    Unknown { reason: String },
}

/// A payment provider's initiation surface.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_charge(&self, request: &ChargeRequest) -> ChargeOutcome;
}
