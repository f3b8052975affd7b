//! Storefront checkout and payment settlement service
//!
//! Prices carts from the catalog, opens payment intents, records pending
//! orders and finalizes them from signed processor webhooks.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod client;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod tracing;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn payments::PaymentGateway>,
        event_sender: events::EventSender,
    ) -> Self {
        let services =
            handlers::AppServices::new(db.clone(), gateway, event_sender.clone(), &config);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Full HTTP surface: function routes, OpenAPI docs, tracing and request ids.
/// CORS is added by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::storefront_routes(state.clone()))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
