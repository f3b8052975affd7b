pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhooks;

use crate::{
    config::AppConfig,
    events::EventSender,
    payments::PaymentGateway,
    services::{
        checkout::CheckoutService, orders::OrderQueryService, settlement::SettlementService,
    },
    AppState,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementService>,
    pub orders: Arc<OrderQueryService>,
    pub gateway_name: &'static str,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            gateway_name: gateway.name(),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                gateway,
                event_sender.clone(),
                cfg,
            )),
            settlement: Arc::new(SettlementService::new(db.clone(), event_sender)),
            orders: Arc::new(OrderQueryService::new(db)),
        }
    }
}

/// Success envelope: `{ "data": ... }`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Function endpoints plus read-only order and health routes
pub fn storefront_routes(state: AppState) -> Router<AppState> {
    let checkout = Router::new()
        .route("/checkout-init", post(checkout::checkout_init))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware_helpers::api_key::require_function_key,
        ));

    Router::new()
        .merge(checkout)
        .route("/stripe-webhook", post(webhooks::stripe_webhook))
        .route("/orders/:id", get(orders::get_order))
        .route("/health", get(health::health_check))
        .route("/status", get(health::status))
}
