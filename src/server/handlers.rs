//! Route handlers

use std::time::Instant;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::AppState;
use crate::error::AuthError;
use crate::services::{ConsumerId, InboundRequest, Verification};

/// Response header carrying the verified identity
pub const CONSUMER_ID_HEADER: &str = "x-consumer-id";

/// Inbound headers that already identify the request trace
const REQUEST_ID_HEADERS: [&str; 2] = ["traceparent", "uber-trace-id"];

/// `ANY /`
pub async fn verify(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request = InboundRequest::new(method, uri.path(), headers);

    let Verification { outcome, trace_id } = state.auth.verify_traced(&request).await;
    let response = match outcome {
        Ok(consumer) => accepted(&consumer),
        Err(e) => rejected(&e),
    };

    tracing::info!(
        request_id = %request_id(&request.headers, trace_id.as_deref()),
        strategy = state.auth.strategy_name(),
        status = response.status().as_u16(),
        took = ?started.elapsed(),
        "Verification finished"
    );

    response
}

fn accepted(consumer: &ConsumerId) -> Response {
    match HeaderValue::from_str(consumer.as_str()) {
        Ok(value) => (StatusCode::OK, [(CONSUMER_ID_HEADER, value)], Json("OK")).into_response(),
        Err(e) => rejected(&AuthError::internal(format!(
            "consumer id is not a valid header value: {}",
            e
        ))),
    }
}

fn rejected(error: &AuthError) -> Response {
    match error {
        AuthError::Unauthorized(_) => {
            tracing::info!(reason = %error, "Request rejected");
            (error.status_code(), Json("Unauthorized")).into_response()
        }
        AuthError::Internal(_) => {
            tracing::error!(error = %error, "Verification failed");
            (error.status_code(), Json("Internal Server Error")).into_response()
        }
    }
}

/// Identifier used to correlate the summary log line
///
/// The inbound trace header wins, then the trace id of the request span.
pub fn request_id(headers: &HeaderMap, trace_id: Option<&str>) -> String {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .or(trace_id)
        .unwrap_or("undefined")
        .to_string()
}

/// `GET /health`
pub async fn health() -> Json<&'static str> {
    Json("")
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Some(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `ANY /200`, debug mode only
pub async fn always_success(
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
) -> &'static str {
    let mut dump = format!("{} {} {:?}\r\n", method, uri, version);
    for (name, value) in &headers {
        dump.push_str(&format!(
            "{}: {}\r\n",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    tracing::debug!("{}", dump);
    "I am auth"
}

/// `ANY /404`, debug mode only
pub async fn always_fail() -> StatusCode {
    StatusCode::NOT_FOUND
}
