use super::{CreateIntent, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Server-side client for the processor's payment intents API
#[derive(Clone)]
pub struct StripeGateway {
    http: Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: IntentStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    code: Option<String>,
    #[serde(default)]
    message: String,
}

impl StripeGateway {
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<ErrorEnvelope>(&body) {
                Ok(envelope) => GatewayError::Rejected {
                    kind: envelope.error.kind,
                    code: envelope.error.code,
                    message: envelope.error.message,
                },
                Err(_) => GatewayError::InvalidResponse(format!("HTTP {}", status)),
            });
        }

        let intent: IntentBody = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| GatewayError::InvalidResponse("intent has no client_secret".into()))?;

        Ok(PaymentIntent {
            id: intent.id,
            client_secret,
            amount: intent.amount,
            currency: intent.currency,
            status: intent.status,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(amount = request.amount_minor, currency = %request.currency))]
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_ascii_lowercase()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let response = self
            .http
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let intent = Self::read_intent(response).await?;
        debug!(payment_intent_id = %intent.id, "payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(self.url(&format!("/v1/payment_intents/{}/cancel", intent_id)))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let intent = Self::read_intent(response).await?;
        if intent.status != IntentStatus::Canceled {
            warn!(payment_intent_id = %intent.id, status = ?intent.status, "cancel did not settle the intent");
        }
        Ok(())
    }
}
