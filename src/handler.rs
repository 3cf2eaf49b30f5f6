//! # HTTP Handler
//!
//! Converts inbound HTTP requests into core [`Request`]s, runs them
//! through a [`RateLimiter`], and either forwards to the injected
//! [`Forwarder`] or rejects with `429`/`500`. Two modes share this
//! plumbing (§4.6):
//!
//! - **Enforcing** (`http`): blocks over-limit requests with `429`.
//! - **Shadow** (`httplogger`): always forwards, recording the decision
//!   through the structured logger instead of response headers/status.
//!
//! Grounded on the original `handlers.http.HTTPRateLimiter.Handle` (the
//! `X-Rate-Limit-*` header names map 1:1 onto this crate's
//! `X-Ratelimit-*` headers) and `daemon.daemon.ServeHTTP` for the
//! `X-Request-Id` assignment that wraps every dispatch.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request as AxumRequest, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::SphinxError;
use crate::forwarder::Forwarder;
use crate::rate_limiter::{RateLimiter, Status};
use crate::request::Request;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_FORWARDED_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Which of the two handler modes this `Handler` runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `http`: blocks over-limit requests.
    Enforcing { allow_on_error: bool },
    /// `httplogger`: always forwards.
    Shadow,
}

/// The built handler for one loaded configuration: a rate limiter, an
/// injected forwarder, and the mode to apply their outcome in. The
/// [`crate::daemon::Daemon`] swaps this whole value atomically on reload.
pub struct Handler {
    rate_limiter: RateLimiter,
    forwarder: Arc<dyn Forwarder>,
    mode: Mode,
}

impl Handler {
    pub fn new(rate_limiter: RateLimiter, forwarder: Arc<dyn Forwarder>, mode: Mode) -> Self {
        Self { rate_limiter, forwarder, mode }
    }

    pub async fn handle(&self, mut req: AxumRequest) -> Response {
        let start = Instant::now();
        ensure_request_id(req.headers_mut());
        let guid = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let headers = req.headers().clone();
        let remote_addr = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());

        let body = match to_bytes(req.into_body(), MAX_FORWARDED_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to buffer request body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let core_request = Request::new(path.clone(), headers.clone(), remote_addr, method.clone());
        let (statuses, result) = self.rate_limiter.add(&core_request).await;
        let limited = matches!(result, Err(SphinxError::BucketFull));

        let response = match self.mode {
            Mode::Enforcing { allow_on_error } => {
                self.handle_enforcing(result, &statuses, method, &path, &headers, body, allow_on_error).await
            }
            Mode::Shadow => self.handle_shadow(result, &statuses, method, &path, &headers, body).await,
        };

        log_request_finished(&method_str(&core_request), &path, response.status(), start.elapsed(), &guid, limited);
        response
    }

    async fn handle_enforcing(
        &self,
        result: Result<(), SphinxError>,
        statuses: &[Status],
        method: axum::http::Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
        allow_on_error: bool,
    ) -> Response {
        match result {
            Err(SphinxError::BucketFull) => {
                let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
                apply_rate_limit_headers(response.headers_mut(), statuses);
                response
            }
            Err(err) if allow_on_error => {
                warn!(error = %err, "rate limiter error, forwarding per allow-on-error");
                self.forward(method, path, headers, body).await
            }
            Err(err) => {
                error!(error = %err, "rate limiter error, rejecting (allow-on-error disabled)");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Ok(()) => {
                let mut response = self.forward(method, path, headers, body).await;
                apply_rate_limit_headers(response.headers_mut(), statuses);
                response
            }
        }
    }

    async fn handle_shadow(
        &self,
        result: Result<(), SphinxError>,
        statuses: &[Status],
        method: axum::http::Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response {
        match &result {
            Err(SphinxError::BucketFull) => {
                info!(statuses = statuses.len(), "shadow mode: would have rate-limited, forwarding anyway");
            }
            Err(err) => {
                warn!(error = %err, "shadow mode: rate limiter error, forwarding anyway");
            }
            Ok(()) => {}
        }
        self.forward(method, path, headers, body).await
    }

    async fn forward(&self, method: axum::http::Method, path: &str, headers: &HeaderMap, body: Bytes) -> Response {
        match self.forwarder.forward(method, path, headers, body).await {
            Ok(forwarded) => {
                let mut response = Response::builder().status(forwarded.status);
                for (name, value) in forwarded.headers.iter() {
                    response = response.header(name, value);
                }
                response.body(Body::from(forwarded.body)).unwrap_or_else(|_| {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })
            }
            Err(err) => {
                error!(error = %err, "failed to forward request upstream");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

fn method_str(request: &Request) -> String {
    request.method.to_string()
}

fn ensure_request_id(headers: &mut HeaderMap) {
    if headers.contains_key(REQUEST_ID_HEADER) {
        return;
    }
    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, statuses: &[Status]) {
    if statuses.is_empty() {
        return;
    }
    for status in statuses {
        let reset_unix = status
            .reset
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        append_header(headers, "x-ratelimit-limit", status.capacity.to_string());
        append_header(headers, "x-ratelimit-remaining", status.remaining.to_string());
        append_header(headers, "x-ratelimit-reset", reset_unix.to_string());
        append_header(headers, "x-ratelimit-bucket", status.name.clone());
    }
}

fn append_header(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.append(HeaderName::from_static(name), value);
    }
}

/// Matches a run of 8+ hex digits, the "long hex id" the observability
/// contract (§6) asks to be stripped from the `op` field so that e.g.
/// `/users/deadbeefcafe1234/orders` and `/users/0000000000000001/orders`
/// collapse to the same rollup key.
static HEX_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9a-fA-F]{8,}").unwrap());

fn extract_op(path: &str) -> String {
    HEX_ID.replace_all(path, ":id").to_string()
}

fn log_request_finished(
    method: &str,
    path: &str,
    status: StatusCode,
    elapsed: std::time::Duration,
    guid: &str,
    limited: bool,
) {
    info!(
        target: "request-finished",
        method = %method,
        path = %path,
        op = %extract_op(path),
        status = status.as_u16(),
        response_time_ms = elapsed.as_millis() as u64,
        guid = %guid,
        limit = limited,
        timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
        "request-finished"
    );
}

pub async fn serve(State(handler): State<Arc<tokio::sync::RwLock<Arc<Handler>>>>, req: AxumRequest) -> Response {
    let handler = handler.read().await.clone();
    handler.handle(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_op_strips_long_hex_ids() {
        assert_eq!(extract_op("/users/deadbeefcafe1234/orders"), "/users/:id/orders");
        assert_eq!(extract_op("/users/0000000000000001/orders"), "/users/:id/orders");
    }

    #[test]
    fn extract_op_leaves_short_segments_alone() {
        assert_eq!(extract_op("/api/v1/widgets"), "/api/v1/widgets");
    }

    #[test]
    fn ensure_request_id_preserves_existing() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("existing-id"));
        ensure_request_id(&mut headers);
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "existing-id");
    }

    #[test]
    fn ensure_request_id_assigns_when_absent() {
        let mut headers = HeaderMap::new();
        ensure_request_id(&mut headers);
        assert!(headers.get(REQUEST_ID_HEADER).is_some());
    }

    #[test]
    fn rate_limit_headers_are_one_value_per_status_in_order() {
        let statuses = vec![
            Status { name: "a".to_string(), capacity: 10, remaining: 9, reset: SystemTime::now() },
            Status { name: "b".to_string(), capacity: 5, remaining: 0, reset: SystemTime::now() },
        ];
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &statuses);
        let buckets: Vec<&str> = headers
            .get_all("x-ratelimit-bucket")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(buckets, vec!["a", "b"]);
    }

    #[test]
    fn no_headers_emitted_when_no_statuses() {
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &[]);
        assert!(headers.is_empty());
    }
}
