use crate::{
    config::AppConfig,
    entities::{
        order::{self, OrderStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{self, CreateIntent, PaymentGateway},
    services::pricing::{LineRequest, PriceQuote, PricingResolver, ShippingTier},
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Upper bound for the expiry hint (30 days)
const MAX_EXPIRY_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[validate(length(min = 1, message = "country is required"))]
    pub country: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "addressLine1 is required"))]
    pub address_line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCustomerInfo {
    #[validate(length(min = 1, max = 255, message = "fullName is required"))]
    pub full_name: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, max = 50, message = "phone is required"))]
    pub phone: String,
    #[validate]
    pub address: Address,
    pub shipping_type: ShippingTier,
}

/// Body of `POST /checkout-init`. Line items carry ids and quantities only;
/// any other client field is dropped during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub customer: CheckoutCustomerInfo,
    #[validate(length(min = 1, message = "cart must contain at least one item"))]
    pub items: Vec<LineRequest>,
}

/// What the client needs to confirm payment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub client_secret: String,
    pub order_id: Uuid,
    /// Order total in currency units
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub shipping: Decimal,
    /// Hint only; the processor enforces its own intent expiry
    pub expires_at: DateTime<Utc>,
}

/// Turns a cart into a pending order plus a payable intent.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    pricing: PricingResolver,
    event_sender: EventSender,
    cancel_orphaned_intents: bool,
    expiry: Duration,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            pricing: PricingResolver::from_config(db.clone(), cfg),
            db,
            gateway,
            event_sender,
            cancel_orphaned_intents: cfg.cancel_orphaned_intents,
            expiry: Duration::seconds(cfg.checkout_expiry_secs.min(MAX_EXPIRY_SECS) as i64),
        }
    }

    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn init_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        request.validate()?;

        let quote = self
            .pricing
            .quote(&request.items, request.customer.shipping_type)
            .await?;

        let amount_minor = payments::to_minor_units(quote.total, &quote.currency).ok_or_else(|| {
            ServiceError::ValidationError("order total is out of range".into())
        })?;

        let order_id = Uuid::new_v4();
        let mut metadata = BTreeMap::new();
        metadata.insert("customer_email".to_string(), request.customer.email.clone());
        metadata.insert("customer_name".to_string(), request.customer.full_name.clone());
        metadata.insert("order_id".to_string(), order_id.to_string());

        let intent = self
            .gateway
            .create_intent(CreateIntent {
                amount_minor,
                currency: quote.currency.clone(),
                metadata,
                idempotency_key: format!("checkout-{}", order_id),
            })
            .await
            .map_err(|e| {
                error!(%order_id, error = %e, "payment intent creation failed");
                counter!("storefront_checkout_processor_errors_total", 1);
                ServiceError::from(e)
            })?;

        if let Err(e) = self.persist_order(order_id, &request, &quote, &intent.id).await {
            error!(%order_id, payment_intent_id = %intent.id, error = %e, "order persistence failed");
            counter!("storefront_checkout_persistence_errors_total", 1);
            self.handle_orphaned_intent(&intent.id).await;
            return Err(ServiceError::Persistence(e));
        }

        self.event_sender
            .publish(Event::OrderCreated {
                order_id,
                payment_intent_id: intent.id.clone(),
                total: quote.total,
            })
            .await;
        counter!("storefront_checkout_initialized_total", 1);
        info!(%order_id, payment_intent_id = %intent.id, total = %quote.total, "checkout initialized");

        Ok(CheckoutSession {
            client_secret: intent.client_secret,
            order_id,
            amount: quote.total,
            currency: quote.currency,
            subtotal: quote.subtotal,
            shipping: quote.shipping,
            expires_at: Utc::now() + self.expiry,
        })
    }

    /// Writes the order and its item snapshots atomically
    async fn persist_order(
        &self,
        order_id: Uuid,
        request: &CheckoutRequest,
        quote: &PriceQuote,
        payment_intent_id: &str,
    ) -> Result<(), DbErr> {
        let shipping_info = serde_json::to_value(&request.customer)
            .map_err(|e| DbErr::Custom(format!("shipping info serialization: {}", e)))?;

        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            customer_name: Set(request.customer.full_name.clone()),
            customer_email: Set(request.customer.email.clone()),
            total: Set(quote.total),
            status: Set(OrderStatus::Pending),
            payment_intent_id: Set(payment_intent_id.to_string()),
            shipping_info: Set(shipping_info),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for line in &quote.lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price: Set(line.unit_price),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await
    }

    async fn handle_orphaned_intent(&self, payment_intent_id: &str) {
        if !self.cancel_orphaned_intents {
            warn!(%payment_intent_id, "payment intent left without an order");
            return;
        }

        match self.gateway.cancel_intent(payment_intent_id).await {
            Ok(()) => info!(%payment_intent_id, "orphaned payment intent cancelled"),
            Err(e) => error!(%payment_intent_id, error = %e, "failed to cancel orphaned payment intent"),
        }
    }
}
