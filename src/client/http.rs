use super::{
    orchestrator::{CheckoutApi, ConfirmOutcome, PaymentConfirmer},
    ClientError,
};
use crate::{
    errors::ErrorResponse,
    handlers::DataResponse,
    middleware_helpers::api_key::API_KEY_HEADER,
    services::checkout::{CheckoutRequest, CheckoutSession},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()
        .map_err(|e| ClientError::Transport(e.to_string()))
}

/// Calls `POST /checkout-init` on the storefront backend
#[derive(Clone)]
pub struct HttpCheckoutApi {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    session_token: Option<String>,
}

impl HttpCheckoutApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_client(DEFAULT_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            session_token: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

#[async_trait]
impl CheckoutApi for HttpCheckoutApi {
    async fn init_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ClientError> {
        let mut builder = self
            .http
            .post(format!("{}/checkout-init", self.base_url))
            .json(request);
        if let Some(token) = &self.session_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if status.is_success() {
            let envelope: DataResponse<CheckoutSession> = serde_json::from_slice(&body)
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            return Ok(envelope.data);
        }

        let message = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("checkout failed with HTTP {}", status.as_u16()));
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Confirms intents with the processor using the publishable key
#[derive(Clone)]
pub struct StripeConfirmer {
    http: Client,
    publishable_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmedIntent {
    status: String,
    last_payment_error: Option<ProcessorMessage>,
}

#[derive(Debug, Deserialize)]
struct ProcessorMessage {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProcessorError {
    error: ProcessorMessage,
}

impl StripeConfirmer {
    pub fn new(
        publishable_key: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_client(DEFAULT_TIMEOUT)?,
            publishable_key: publishable_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Intent id is the client secret up to `_secret_`
fn intent_id(client_secret: &str) -> Result<&str, ClientError> {
    client_secret
        .split_once("_secret_")
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ClientError::Decode("malformed client secret".into()))
}

#[async_trait]
impl PaymentConfirmer for StripeConfirmer {
    async fn confirm(
        &self,
        client_secret: &str,
        payment_method: &str,
    ) -> Result<ConfirmOutcome, ClientError> {
        let id = intent_id(client_secret)?;
        let response = self
            .http
            .post(format!("{}/v1/payment_intents/{}/confirm", self.api_base, id))
            .bearer_auth(&self.publishable_key)
            .form(&[
                ("client_secret", client_secret),
                ("payment_method", payment_method),
            ])
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            return match serde_json::from_slice::<ProcessorError>(&body) {
                Ok(ProcessorError {
                    error: ProcessorMessage { message: Some(message) },
                }) if status.is_client_error() => Ok(ConfirmOutcome::Failed(message)),
                _ => Err(ClientError::Api {
                    status: status.as_u16(),
                    message: format!("payment confirmation failed with HTTP {}", status.as_u16()),
                }),
            };
        }

        let intent: ConfirmedIntent =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(match intent.status.as_str() {
            "succeeded" => ConfirmOutcome::Succeeded,
            "requires_payment_method" => ConfirmOutcome::Failed(
                intent
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Payment failed".to_string()),
            ),
            "canceled" => ConfirmOutcome::Failed("Payment was canceled".to_string()),
            _ => ConfirmOutcome::Processing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::checkout::{Address, CheckoutCustomerInfo};
    use crate::services::pricing::{LineRequest, ShippingTier};
    use assert_matches::assert_matches;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            customer: CheckoutCustomerInfo {
                full_name: "Ana Ruiz".into(),
                email: "ana@example.com".into(),
                phone: "+51 999 000 111".into(),
                address: Address {
                    country: "PE".into(),
                    city: "Lima".into(),
                    address_line1: "Av. Larco 123".into(),
                    address_line2: None,
                    postal_code: None,
                },
                shipping_type: ShippingTier::Express,
            },
            items: vec![LineRequest {
                product_id: Uuid::new_v4(),
                quantity: 2,
            }],
        }
    }

    #[test]
    fn intent_id_from_client_secret() {
        assert_eq!(intent_id("pi_123_secret_abc").unwrap(), "pi_123");
        assert!(intent_id("garbage").is_err());
    }

    #[tokio::test]
    async fn checkout_api_sends_headers_and_unwraps_data() {
        let server = MockServer::start().await;
        let order_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/checkout-init"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "clientSecret": "pi_1_secret_x",
                    "orderId": order_id,
                    "amount": 225.0,
                    "currency": "usd",
                    "subtotal": 200.0,
                    "shipping": 25.0,
                    "expiresAt": "2030-01-01T00:00:00Z"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpCheckoutApi::new(server.uri())
            .unwrap()
            .with_api_key("anon-key")
            .with_session_token("token-1");
        let session = api.init_checkout(&request()).await.unwrap();
        assert_eq!(session.order_id, order_id);
        assert_eq!(session.client_secret, "pi_1_secret_x");
    }

    #[tokio::test]
    async fn checkout_api_maps_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout-init"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "Could not start checkout: a product in your cart is no longer available"
            })))
            .mount(&server)
            .await;

        let err = HttpCheckoutApi::new(server.uri())
            .unwrap()
            .init_checkout(&request())
            .await
            .unwrap_err();
        assert_matches!(err, ClientError::Api { status: 404, ref message } if message.contains("no longer available"));
    }

    #[tokio::test]
    async fn confirmer_maps_intent_states() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_ok/confirm"))
            .and(body_string_contains("payment_method=pm_card_visa"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "succeeded"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_slow/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_bad/confirm"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {"type": "card_error", "message": "Your card was declined."}
            })))
            .mount(&server)
            .await;

        let confirmer = StripeConfirmer::new("pk_test_1", server.uri()).unwrap();
        assert_eq!(
            confirmer.confirm("pi_ok_secret_1", "pm_card_visa").await.unwrap(),
            ConfirmOutcome::Succeeded
        );
        assert_eq!(
            confirmer.confirm("pi_slow_secret_1", "pm_card_visa").await.unwrap(),
            ConfirmOutcome::Processing
        );
        assert_eq!(
            confirmer.confirm("pi_bad_secret_1", "pm_card_declined").await.unwrap(),
            ConfirmOutcome::Failed("Your card was declined.".into())
        );
    }
}
