mod common;

use axum::http::Method;
use common::TestApp;

#[tokio::test]
async fn health_reports_database_state() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "healthy");
}

#[tokio::test]
async fn status_names_the_payment_provider() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/status", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["payment_provider"], "fake");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn openapi_document_lists_function_routes() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, &[])
        .await;
    assert_eq!(status, 200);
    assert!(body["paths"]["/checkout-init"]["post"].is_object());
    assert!(body["paths"]["/stripe-webhook"]["post"].is_object());
    assert!(body["paths"]["/orders/{id}"]["get"].is_object());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/orders/{}", uuid::Uuid::new_v4()),
            None,
            &[("x-request-id", "trace-me-42")],
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["request_id"], "trace-me-42");
}
