use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

/// Liveness plus database reachability
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_healthy = crate::db::check_connection(&state.db).await.is_ok();
    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_healthy { "healthy" } else { "unhealthy" },
            "checks": {
                "database": if db_healthy { "healthy" } else { "unhealthy" },
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "payment_provider": state.services.gateway_name,
    }))
}
