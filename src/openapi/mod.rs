use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront checkout and settlement

Checkout prices carts from the catalog, opens a payment intent and records a
pending order. The payment processor then reports the outcome through a
signed webhook, which completes or cancels the order and decrements stock.

## Authentication

When a platform key is configured, `POST /checkout-init` requires it in the
`apikey` header. Webhooks are authenticated by their `Stripe-Signature` header.

## Errors

Every error body has the form:

```json
{ "error": "Could not start checkout", "request_id": "..." }
```
"#
    ),
    paths(
        crate::handlers::checkout::checkout_init,
        crate::handlers::webhooks::stripe_webhook,
        crate::handlers::orders::get_order,
    ),
    components(
        schemas(
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutCustomerInfo,
            crate::services::checkout::Address,
            crate::services::checkout::CheckoutSession,
            crate::services::pricing::LineRequest,
            crate::services::pricing::ShippingTier,
            crate::services::orders::OrderView,
            crate::services::orders::OrderItemView,
            crate::entities::OrderStatus,
            crate::handlers::webhooks::WebhookAck,
            crate::errors::ErrorResponse
        )
    ),
    tags(
        (name = "Checkout", description = "Cart to pending order"),
        (name = "Webhooks", description = "Payment outcome delivery"),
        (name = "Orders", description = "Order status")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
