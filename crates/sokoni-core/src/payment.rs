//! # Payment Transaction Ledger Types
//!
//! Every payment attempt is a ledger row, independent of order status.
//! Rows are created by `initiate`, updated by the initiating call or the
//! reconciliation handler, and never deleted. An order may accumulate
//! several transactions (client retries); the idempotency key keeps retried
//! requests from minting duplicates.
//!
//! State machine:
//!
//! ```text
//!   initiated ──► pending ──► succeeded ──► refunded (reserved)
//!        │            │
//!        └────────────┴─────► failed
//! ```
//!
//! `succeeded` and `failed` are terminal: reconciliation callbacks that
//! arrive after a transaction settled are acknowledged and dropped, which
//! is what makes at-least-once webhook delivery safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::money::Money;

// =============================================================================
// Provider
// =============================================================================

/// Payment providers the ledger knows about.
///
/// `None` is the development stub: it settles immediately without any
/// external call, exactly like the upstream dev flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mpesa,
    None,
}

impl ProviderKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mpesa => "mpesa",
            ProviderKind::None => "none",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpesa" => Ok(ProviderKind::Mpesa),
            "none" => Ok(ProviderKind::None),
            other => Err(CoreError::UnsupportedProvider(other.to_string())),
        }
    }
}

// =============================================================================
// Transaction Status
// =============================================================================

/// Status of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Ledger row created; no provider contact yet.
    Initiated,
    /// Provider accepted the charge request (or its outcome is unknown
    /// after a timeout - the charge may still complete provider-side).
    Pending,
    /// Provider confirmed the charge; amount verified.
    Succeeded,
    /// Provider rejected/failed the charge, or verification failed.
    Failed,
    /// Reserved for the refund flow.
    Refunded,
}

impl TxStatus {
    /// Terminal transactions ignore further reconciliation callbacks.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Succeeded | TxStatus::Failed | TxStatus::Refunded)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Initiated => "initiated",
            TxStatus::Pending => "pending",
            TxStatus::Succeeded => "succeeded",
            TxStatus::Failed => "failed",
            TxStatus::Refunded => "refunded",
        }
    }
}

// =============================================================================
// Payment Transaction
// =============================================================================

/// A ledger entry: one payment attempt against one order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentTransaction {
    pub id: String,
    pub order_id: String,
    pub provider: ProviderKind,
    /// Always the order's server-computed total at initiation time; client
    /// input never sets this.
    pub amount_cents: i64,
    pub currency: String,
    pub status: TxStatus,
    /// Client-supplied retry token; unique per (order, provider, key).
    pub idempotency_key: Option<String>,
    /// Provider-issued request id (e.g. the STK CheckoutRequestID). The
    /// join key for asynchronous callbacks, which do not carry our ids.
    pub correlation_id: Option<String>,
    /// Provider receipt id once settled.
    pub provider_tx_id: Option<String>,
    /// Raw provider payload, kept verbatim for audit.
    pub raw: Option<serde_json::Value>,
    /// Human-readable failure reason.
    pub error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Provider Callback (normalized)
// =============================================================================

/// A provider callback after adapter normalization.
///
/// Adapters parse the provider-specific payload (and convert the reported
/// amount into minor units) before the ledger ever sees it; the ledger only
/// reasons about this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCallback {
    /// Provider correlation id to match against the ledger.
    pub correlation_id: String,
    /// Whether the provider reports the charge as successful.
    pub success: bool,
    /// Amount the provider claims was paid, in minor units. Success
    /// callbacks without an amount fall back to the stored amount.
    pub amount_cents: Option<i64>,
    /// Provider receipt id on success.
    pub receipt: Option<String>,
    /// Failure description on non-success.
    pub failure_reason: Option<String>,
    /// The raw payload, stored for audit.
    pub raw: serde_json::Value,
}

// =============================================================================
// Unit Tests
// =============================================================================
