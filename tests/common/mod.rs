#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{order, product},
    events::{self, EventSender},
    payments::{
        webhook::{sign_payload, SIGNATURE_HEADER},
        CreateIntent, GatewayError, IntentStatus, PaymentGateway, PaymentIntent,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";
pub const FUNCTION_KEY: &str = "anon-test-key";

/// Gateway double that records every call
#[derive(Default)]
pub struct FakeGateway {
    pub created: Mutex<Vec<CreateIntent>>,
    pub cancelled: Mutex<Vec<String>>,
    fail_with: Mutex<Option<GatewayError>>,
}

impl FakeGateway {
    pub fn fail_next(&self, err: GatewayError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    pub fn created(&self) -> Vec<CreateIntent> {
        self.created.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError> {
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        let id = format!("pi_test_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: format!("{}_secret_test", id),
            id,
            amount: request.amount_minor,
            currency: request.currency.clone(),
            status: IntentStatus::RequiresPaymentMethod,
        };
        self.created.lock().unwrap().push(request);
        Ok(intent)
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        self.cancelled.lock().unwrap().push(intent_id.to_string());
        Ok(())
    }
}

/// Application wired to an in-memory SQLite database and a fake gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        // One connection keeps the in-memory database alive and shared
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.function_api_key = Some(FUNCTION_KEY.to_string());
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::new(Arc::new(pool), cfg, gateway.clone(), event_sender);
        let router = app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        sale_price: Option<Decimal>,
        stock: i32,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            sale_price: Set(sale_price),
            on_sale: Set(sale_price.is_some()),
            stock: Set(stock),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product for tests")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Body>,
        headers: &[(&str, &str)],
    ) -> (u16, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(body.unwrap_or_else(Body::empty))
            .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");
        let status = response.status().as_u16();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// `POST /checkout-init` with the function key
    pub async fn checkout(&self, body: &Value) -> (u16, Value) {
        self.request(
            Method::POST,
            "/checkout-init",
            Some(Body::from(serde_json::to_vec(body).expect("serialize body"))),
            &[("content-type", "application/json"), ("apikey", FUNCTION_KEY)],
        )
        .await
    }

    /// Delivers a correctly signed processor event
    pub async fn deliver_webhook(&self, event_type: &str, payment_intent_id: &str) -> (u16, Value) {
        let payload = event_payload(event_type, payment_intent_id);
        let header = sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        self.deliver_raw_webhook(payload, Some(&header)).await
    }

    pub async fn deliver_raw_webhook(&self, payload: Vec<u8>, signature: Option<&str>) -> (u16, Value) {
        let mut headers = vec![("content-type", "application/json")];
        if let Some(signature) = signature {
            headers.push((SIGNATURE_HEADER, signature));
        }
        self.request(Method::POST, "/stripe-webhook", Some(Body::from(payload)), &headers)
            .await
    }

    pub async fn order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(self.state.db.as_ref())
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn order_count(&self) -> usize {
        order::Entity::find()
            .all(self.state.db.as_ref())
            .await
            .expect("query orders")
            .len()
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.state.db.as_ref())
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    /// Runs a checkout and returns `(order_id, payment_intent_id)`
    pub async fn place_order(&self, lines: &[(Uuid, i32)]) -> (Uuid, String) {
        let (status, body) = self.checkout(&checkout_body(lines, "normal")).await;
        assert_eq!(status, 200, "checkout failed: {}", body);
        let order_id: Uuid = body["data"]["orderId"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .expect("order id in response");
        let intent_id = self.order(order_id).await.payment_intent_id;
        (order_id, intent_id)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn checkout_body(lines: &[(Uuid, i32)], shipping_type: &str) -> Value {
    let items: Vec<Value> = lines
        .iter()
        .map(|(product_id, quantity)| json!({ "productId": product_id, "quantity": quantity }))
        .collect();
    json!({
        "customer": {
            "fullName": "Ana Ruiz",
            "email": "ana@example.com",
            "phone": "+51 999 000 111",
            "address": {
                "country": "PE",
                "city": "Lima",
                "addressLine1": "Av. Larco 123",
                "postalCode": "15074"
            },
            "shippingType": shipping_type
        },
        "items": items
    })
}

pub fn event_payload(event_type: &str, payment_intent_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": payment_intent_id,
                "object": "payment_intent",
                "last_payment_error": { "code": "card_declined", "message": "Your card was declined." }
            }
        }
    }))
    .expect("serialize event")
}
