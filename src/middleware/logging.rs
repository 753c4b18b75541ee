use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{debug, warn};

use crate::metrics;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Tags every request with an id (kept if the client sent one), echoes it on
/// the response, and records latency.
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());
    if let Some(id) = &request_id {
        request.headers_mut().insert(X_REQUEST_ID, id.clone());
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status();

    metrics::record_http_request(status.as_u16(), latency.as_secs_f64());

    let id = request_id
        .as_ref()
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    if status.is_server_error() {
        warn!(
            request_id = id,
            %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Request failed"
        );
    } else {
        debug!(
            request_id = id,
            %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Request completed"
        );
    }

    if let Some(id) = request_id {
        response.headers_mut().insert(X_REQUEST_ID, id);
    }
    response
}
