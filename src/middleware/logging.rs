//! Request logging middleware
//!
//! Every request gets a trace id: the caller's `x-trace-id` or
//! `x-request-id` when present, a fresh UUID otherwise. The id is stored in
//! the request extensions, attached to the request span and echoed in both
//! response headers.

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug, PartialEq)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_request(request: &Request) -> Self {
        [TRACE_ID_HEADER, REQUEST_ID_HEADER]
            .iter()
            .find_map(|name| {
                request
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
            })
            .map(|v| Self(v.to_string()))
            .unwrap_or_default()
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Log method, path, status and duration of each request
pub async fn log_request(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let trace_id = TraceId::from_request(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    request.extensions_mut().insert(trace_id.clone());

    let span = tracing::info_span!("http_request", trace_id = %trace_id, method = %method, path = %path);
    let mut response = next.run(request).instrument(span).await;

    let status = response.status();
    let duration_ms = format!("{:.2}", start.elapsed().as_secs_f64() * 1000.0);
    log_completion(status, &trace_id, method.as_str(), &path, &duration_ms);

    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value.clone());
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

fn log_completion(status: StatusCode, trace_id: &TraceId, method: &str, path: &str, duration_ms: &str) {
    let status_code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(%trace_id, method, path, status = status_code, duration_ms, "Server error");
    } else if status.is_client_error() {
        tracing::warn!(%trace_id, method, path, status = status_code, duration_ms, "Client error");
    } else {
        tracing::info!(%trace_id, method, path, status = status_code, duration_ms, "Request completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(log_request))
    }

    #[test]
    fn test_trace_id_generation() {
        assert_eq!(TraceId::new().as_str().len(), 36);
    }

    #[tokio::test]
    async fn test_incoming_trace_id_is_echoed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[TRACE_ID_HEADER], "req-42");
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[tokio::test]
    async fn test_trace_id_generated_when_absent() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key(TRACE_ID_HEADER));
    }
}
