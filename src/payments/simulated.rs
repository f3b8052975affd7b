use super::{CreateIntent, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

/// In-process processor for local development.
///
/// Intents are kept in memory and never confirmed; settlement is driven by
/// signing webhook payloads by hand (see `storefront-cli sign-webhook`).
#[derive(Default)]
pub struct SimulatedGateway {
    by_idempotency_key: Mutex<HashMap<String, PaymentIntent>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    #[instrument(skip(self, request), fields(amount = request.amount_minor))]
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError> {
        if request.amount_minor <= 0 {
            return Err(GatewayError::Rejected {
                kind: "invalid_request_error".into(),
                code: Some("amount_too_small".into()),
                message: "Amount must be greater than zero".into(),
            });
        }

        let mut intents = self
            .by_idempotency_key
            .lock()
            .map_err(|_| GatewayError::Transport("simulated gateway state poisoned".into()))?;

        let intent = intents
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| {
                let id = format!("pi_sim_{}", Uuid::new_v4().simple());
                PaymentIntent {
                    client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
                    id,
                    amount: request.amount_minor,
                    currency: request.currency.to_ascii_lowercase(),
                    status: IntentStatus::RequiresPaymentMethod,
                }
            })
            .clone();

        info!(payment_intent_id = %intent.id, "simulated payment intent created");
        Ok(intent)
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        let mut intents = self
            .by_idempotency_key
            .lock()
            .map_err(|_| GatewayError::Transport("simulated gateway state poisoned".into()))?;

        match intents.values_mut().find(|intent| intent.id == intent_id) {
            Some(intent) => {
                intent.status = IntentStatus::Canceled;
                Ok(())
            }
            None => Err(GatewayError::Rejected {
                kind: "invalid_request_error".into(),
                code: Some("resource_missing".into()),
                message: format!("No such payment_intent: '{}'", intent_id),
            }),
        }
    }
}
