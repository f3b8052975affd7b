use crate::{
    errors::{ErrorResponse, ServiceError},
    handlers::DataResponse,
    services::orders::OrderView,
    AppState,
};
use axum::{
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use uuid::Uuid;

/// Order status for clients waiting on asynchronous settlement
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = DataResponse<OrderView>),
        (status = 400, description = "Malformed id", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DataResponse<OrderView>>, ServiceError> {
    let Path(order_id) = id.map_err(|e| ServiceError::ValidationError(e.body_text()))?;
    let order = state.services.orders.get_order(order_id).await?;
    Ok(Json(DataResponse::new(order)))
}
