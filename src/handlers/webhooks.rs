use crate::{
    errors::{ErrorResponse, ServiceError},
    payments::webhook::{self, SignatureError, WebhookEvent},
    AppState,
};
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receives signed payment events. Anything past the signature check is
/// acknowledged so the processor stops redelivering, unless the order lookup
/// itself failed; that answers 500 so the delivery is retried.
#[utoipa::path(
    post,
    path = "/stripe-webhook",
    request_body(content = String, description = "Raw signed event payload"),
    params(
        ("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")
    ),
    responses(
        (status = 200, description = "Event processed or ignored", body = WebhookAck),
        (status = 400, description = "Signature verification failed", body = ErrorResponse),
        (status = 500, description = "Order lookup failed, retry later", body = ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let secret = state
        .config
        .payment_webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            error!("payment_webhook_secret is not configured; rejecting webhook");
            ServiceError::SignatureVerification("webhook secret not configured".into())
        })?;

    let signature = headers
        .get(webhook::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::SignatureVerification(SignatureError::MissingHeader.to_string()))?;

    webhook::verify_signature(
        &body,
        signature,
        secret,
        state.config.payment_webhook_tolerance_secs,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!(error = %e, "webhook signature verification failed");
        counter!("storefront_webhook_signature_failures_total", 1);
        ServiceError::SignatureVerification(e.to_string())
    })?;

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            // Redelivery would fail the same way
            warn!(error = %e, "signed webhook payload could not be parsed");
            counter!("storefront_webhook_unreadable_total", 1);
            state
                .services
                .settlement
                .report_unreadable_event(e.to_string())
                .await;
            return Ok(Json(WebhookAck { received: true }));
        }
    };

    let outcome = state
        .services
        .settlement
        .handle_event(&event)
        .await
        .map_err(|e| {
            error!(event_id = %event.id, error = %e, "webhook not applied; processor will retry");
            e
        })?;
    debug!(event_id = %event.id, ?outcome, "webhook handled");

    Ok(Json(WebhookAck { received: true }))
}
