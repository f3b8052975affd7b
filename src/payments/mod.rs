//! Payment processor integration.
//!
//! Checkout talks to the processor only through [`PaymentGateway`]; webhook
//! authentication lives in [`webhook`].

pub mod simulated;
pub mod stripe;
pub mod webhook;

use crate::config::{AppConfig, PaymentProvider};
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use simulated::SimulatedGateway;
pub use stripe::StripeGateway;

/// Currencies the processor charges in whole units
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Status of a processor-side payment intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    /// Credential the client uses to confirm the intent
    pub client_secret: String,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntent {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
    /// Replays of the same key return the original intent instead of charging twice
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The processor answered and refused the request
    #[error("processor rejected request ({kind}): {message}")]
    Rejected {
        kind: String,
        code: Option<String>,
        message: String,
    },

    #[error("processor unreachable: {0}")]
    Transport(String),

    #[error("unexpected processor response: {0}")]
    InvalidResponse(String),

    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Card errors carry text intended for the cardholder
    pub fn user_message(&self) -> Option<String> {
        match self {
            GatewayError::Rejected { kind, message, .. } if kind == "card_error" => {
                Some(message.clone())
            }
            _ => None,
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::PaymentProcessor {
            user_message: err.user_message(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError>;
}

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES.contains(&currency.to_ascii_lowercase().as_str())
}

/// Converts a decimal amount into the processor's integer minor units.
///
/// Two-decimal currencies are multiplied by 100; zero-decimal currencies are
/// rounded to whole units. Midpoints round away from zero.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let scaled = if is_zero_decimal(currency) {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Builds the gateway selected by configuration
pub fn build_gateway(cfg: &AppConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match cfg.payment_provider() {
        PaymentProvider::Stripe => {
            let secret_key = cfg
                .stripe_secret_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| GatewayError::Configuration("stripe_secret_key is not set".into()))?;
            let gateway = StripeGateway::new(
                secret_key,
                cfg.stripe_api_base.clone(),
                std::time::Duration::from_secs(cfg.payment_timeout_secs),
            )?;
            Ok(Arc::new(gateway))
        }
        PaymentProvider::Simulated => Ok(Arc::new(SimulatedGateway::new())),
    }
}
