//! Request ID middleware
//!
//! Creates the [`RequestContext`] for each request and runs the rest of the
//! stack inside its span:
//! - Generates the server request ID and exposes it as `x-request-id`
//! - Echoes a differing client `x-request-id` as `x-correlation-id`
//! - Logs request completion with status and duration

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::Instrument;

use crate::request_context::RequestContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let start = Instant::now();

    let client_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let context = RequestContext::generate();
    let request_id = context.request_id.clone();
    let span = context.span().clone();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Make the context available to the resolver and handlers.
    req.extensions_mut().insert(context);

    let mut response = async {
        tracing::debug!(method = %method, path = %path, "Incoming request");
        next.run(req).await
    }
    .instrument(span.clone())
    .await;

    let status = response.status();
    span.in_scope(|| {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis(),
            request_id = %request_id,
            "Request completed"
        );
    });

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    if let Some(client_id) = client_id {
        if client_id != request_id {
            if let Ok(value) = HeaderValue::from_str(&client_id) {
                headers.insert(CORRELATION_ID_HEADER, value);
            }
        }
    }

    response
}
