use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Could not start checkout: a product in your cart is no longer available",
    "request_id": "req-abc123xyz"
}))]
pub struct ErrorResponse {
    /// Human-readable error description
    pub error: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    /// `user_message` carries processor text that is safe to show a shopper
    /// (declined-card reasons); `message` is for logs only.
    #[error("Payment processor error: {message}")]
    PaymentProcessor {
        message: String,
        user_message: Option<String>,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] DbErr),

    #[error("Webhook signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn processor(message: impl Into<String>) -> Self {
        ServiceError::PaymentProcessor {
            message: message.into(),
            user_message: None,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::SignatureVerification(_) => StatusCode::BAD_REQUEST,
            Self::ProductNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PaymentProcessor { .. } => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::ValidationError(msg) => format!("Invalid request: {}", msg),
            Self::ProductNotFound(_) => {
                "Could not start checkout: a product in your cart is no longer available"
                    .to_string()
            }
            Self::PaymentProcessor { user_message, .. } => user_message
                .clone()
                .unwrap_or_else(|| "Could not start checkout".to_string()),
            Self::Persistence(_) => "Could not start checkout, please try again".to_string(),
            Self::SignatureVerification(_) => "Invalid webhook signature".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            Self::NotFound(_) | Self::Unauthorized(_) => self.to_string(),
        }
    }

    fn log(&self) {
        match self.status_code() {
            status if status.is_server_error() => error!(error = %self, "request failed"),
            _ => warn!(error = %self, "request rejected"),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.response_message(),
            request_id: current_request_id(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("order".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ProductNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::processor("boom").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Persistence(DbErr::Custom("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::SignatureVerification("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        let db = ServiceError::Persistence(DbErr::Custom("relation orders missing".into()));
        assert!(!db.response_message().contains("relation"));

        let processor = ServiceError::processor("api key rejected");
        assert_eq!(processor.response_message(), "Could not start checkout");

        let product_id = Uuid::new_v4();
        let missing = ServiceError::ProductNotFound(product_id);
        assert!(!missing.response_message().contains(&product_id.to_string()));
    }

    #[test]
    fn declined_card_message_is_passed_through() {
        let err = ServiceError::PaymentProcessor {
            message: "card_declined".into(),
            user_message: Some("Your card was declined.".into()),
        };
        assert_eq!(err.response_message(), "Your card was declined.");
    }
}
