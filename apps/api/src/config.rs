//! API configuration module.
//!
//! Configuration is loaded from environment variables with fallback to
//! defaults suitable for local development.

use std::env;
use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// HTTP bind address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,

    /// Path to the SQLite database file.
    pub database_path: String,

    /// HS256 secret for validating bearer tokens. Token issuance lives in
    /// the identity service; this API only verifies.
    pub jwt_secret: String,

    /// Fallback shipping fee (minor units) when no rate matches.
    pub default_shipping_fee_cents: i64,

    /// Client-facing budget for a payment-provider call; on expiry the
    /// transaction stays pending.
    pub provider_timeout: Duration,

    /// M-Pesa (Daraja) settings.
    pub mpesa: MpesaConfig,
}

/// Daraja credentials and endpoints.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    /// `stub` (dev, no network), `sandbox`, or `production`.
    pub environment: String,

    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,

    /// Business shortcode (paybill/till).
    pub shortcode: String,

    /// STK push passkey.
    pub passkey: String,

    /// Public URL Daraja posts callbacks to.
    pub callback_url: String,
}

impl MpesaConfig {
    /// Whether to short-circuit provider calls with the dev stub.
    pub fn is_stub(&self) -> bool {
        self.environment == "stub"
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = ApiConfig {
            bind_addr: env::var("SOKONI_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),

            database_path: env::var("SOKONI_DATABASE_PATH")
                .unwrap_or_else(|_| "./data/sokoni.db".to_string()),

            jwt_secret: env::var("SOKONI_JWT_SECRET")
                // In production this MUST be set via environment variable
                .unwrap_or_else(|_| "sokoni-dev-secret-change-in-production".to_string()),

            default_shipping_fee_cents: env::var("SOKONI_DEFAULT_SHIPPING_FEE_CENTS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SOKONI_DEFAULT_SHIPPING_FEE_CENTS".to_string())
                })?,

            provider_timeout: Duration::from_secs(
                env::var("SOKONI_PROVIDER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("SOKONI_PROVIDER_TIMEOUT_SECS".to_string())
                    })?,
            ),

            mpesa: MpesaConfig {
                environment: env::var("MPESA_ENV").unwrap_or_else(|_| "stub".to_string()),

                base_url: env::var("MPESA_BASE_URL")
                    .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),

                consumer_key: env::var("MPESA_CONSUMER_KEY").unwrap_or_default(),

                consumer_secret: env::var("MPESA_CONSUMER_SECRET").unwrap_or_default(),

                shortcode: env::var("MPESA_SHORTCODE").unwrap_or_else(|_| "174379".to_string()),

                passkey: env::var("MPESA_PASSKEY").unwrap_or_default(),

                callback_url: env::var("MPESA_CALLBACK_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/api/payments/webhook/mpesa".to_string()),
            },
        };

        // Real provider environments need credentials
        if !config.mpesa.is_stub()
            && (config.mpesa.consumer_key.is_empty() || config.mpesa.consumer_secret.is_empty())
        {
            return Err(ConfigError::MissingRequired(
                "MPESA_CONSUMER_KEY / MPESA_CONSUMER_SECRET".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
