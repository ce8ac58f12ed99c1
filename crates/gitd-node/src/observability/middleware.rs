//! Request ID and HTTP metrics middleware.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::metrics::METRICS;

/// Correlation header, echoed back on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation ID of the current request, stored as a request extension.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuses a client-supplied ID when it is valid header text.
    fn from_headers(headers: &HeaderMap) -> Self {
        let id = match headers.get(REQUEST_ID_HEADER).map(HeaderValue::to_str) {
            Some(Ok(id)) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        Self(id)
    }
}

/// Runs the request inside a `request` span keyed by its [`RequestId`].
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = RequestId::from_headers(request.headers());
    let span = tracing::info_span!(
        "request",
        request_id = %id.0,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let echoed = HeaderValue::from_str(&id.0).ok();
    request.extensions_mut().insert(id);

    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = echoed {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Decrements the in-flight gauge even if the handler future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        METRICS.http_active_connections.inc();
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        METRICS.http_active_connections.dec();
    }
}

/// Records count, latency and the in-flight gauge for every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = {
        let _in_flight = InFlight::enter();
        next.run(request).await
    };

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    METRICS.record_http_request(method.as_str(), &path, status, elapsed.as_secs_f64());
    tracing::debug!(%method, %path, status, elapsed_ms = elapsed.as_millis() as u64, "HTTP request served");

    response
}

/// `GET /metrics`.
pub async fn metrics_handler() -> Response<Body> {
    match METRICS.encode() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
