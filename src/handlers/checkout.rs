use crate::{
    errors::{ErrorResponse, ServiceError},
    handlers::DataResponse,
    services::checkout::{CheckoutRequest, CheckoutSession},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

/// Prices the cart, creates a payment intent and records a pending order
#[utoipa::path(
    post,
    path = "/checkout-init",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout started", body = DataResponse<CheckoutSession>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Missing or invalid apikey", body = ErrorResponse),
        (status = 404, description = "Product no longer available", body = ErrorResponse),
        (status = 500, description = "Order could not be saved", body = ErrorResponse),
        (status = 502, description = "Payment processor error", body = ErrorResponse)
    ),
    params(
        ("apikey" = Option<String>, Header, description = "Platform key, required when configured")
    ),
    tag = "Checkout"
)]
pub async fn checkout_init(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<DataResponse<CheckoutSession>>, ServiceError> {
    let Json(request) = payload.map_err(|e| ServiceError::ValidationError(e.body_text()))?;
    let session = state.services.checkout.init_checkout(request).await?;
    Ok(Json(DataResponse::new(session)))
}
