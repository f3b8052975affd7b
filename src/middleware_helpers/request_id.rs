use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Reuses a caller id only if it is short and made of token characters
fn inbound_request_id(headers: &HeaderMap) -> Option<RequestId> {
    let raw = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    let acceptable = !raw.is_empty()
        && raw.len() <= MAX_REQUEST_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
    acceptable.then(|| RequestId::new(raw))
}

/// Tags every request and response with a correlation id and exposes it to
/// handlers as an extension and to error bodies through the task-local.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = inbound_request_id(request.headers()).unwrap_or_default();
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    let header_value = HeaderValue::from_str(request_id.as_str()).ok();

    if let Some(value) = &header_value {
        request.headers_mut().insert(header_name.clone(), value.clone());
    }
    request.extensions_mut().insert(request_id.clone());

    let mut response =
        crate::tracing::scope_request_id(request_id, next.run(request)).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(header_name, value);
    }
    response
}
