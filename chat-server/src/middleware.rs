//! HTTP middleware: request logging with timing, security headers, trusted
//! host filtering, and the body-limit error envelope.

use crate::error::{ApiError, ChatError, ErrorBody};
use crate::routes::MAX_BODY_BYTES;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chat_common::logging::generate_trace_id;
use chat_common::request_span;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Response header carrying the handler time in seconds.
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Response header echoing the request's trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
];

/// Log each request and its outcome inside a span carrying a trace id, and
/// report the elapsed time in `X-Process-Time`.
///
/// An incoming `X-Trace-Id` is reused so callers can correlate logs.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(generate_trace_id);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = request_span!("http_request", trace_id, method = %method, path = %path);

    async move {
        let start = Instant::now();
        tracing::info!("Request received");

        let mut response = next.run(request).await;
        let elapsed = start.elapsed();

        let status = response.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), duration_ms = elapsed.as_millis() as u64, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), duration_ms = elapsed.as_millis() as u64, "Request completed");
        }

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
            headers.insert(PROCESS_TIME_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            headers.insert(TRACE_ID_HEADER, value);
        }

        response
    }
    .instrument(span)
    .await
}

/// Add the fixed security headers to every response.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(*name), HeaderValue::from_static(*value));
    }
    response
}

/// `Host` header patterns a request must match.
#[derive(Debug, Clone)]
pub struct TrustedHosts {
    patterns: Vec<String>,
}

impl TrustedHosts {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.trim().to_lowercase()).collect(),
        }
    }

    /// An empty list or `*` accepts everything.
    pub fn allows_any(&self) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p == "*")
    }

    /// Whether `host` (port already stripped) matches a pattern.
    pub fn allows(&self, host: &str) -> bool {
        if self.allows_any() {
            return true;
        }
        let host = host.to_lowercase();
        self.patterns.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => suffix.starts_with('.') && host.ends_with(suffix),
            None => *pattern == host,
        })
    }
}

/// `"example.com:8000"` → `"example.com"`; `"[::1]:8000"` → `"[::1]"`.
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return authority.find(']').map_or(authority, |end| &authority[..=end]);
    }
    authority.split(':').next().unwrap_or(authority)
}

/// Reject requests whose `Host` header matches none of the trusted patterns.
pub async fn trusted_host(
    State(hosts): State<Arc<TrustedHosts>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if hosts.allows_any() {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .map(strip_port)
        .unwrap_or_default();

    if hosts.allows(host) {
        return next.run(request).await;
    }

    tracing::warn!(host = %host, "Rejected request for untrusted host");
    (
        StatusCode::BAD_REQUEST,
        axum::Json(ErrorBody {
            error: "Invalid host header".into(),
            kind: "http_error",
            path: request.uri().path().to_string(),
            details: None,
        }),
    )
        .into_response()
}

/// Replace the plain-text 413 of the body-size limit with the JSON error envelope.
pub async fn payload_too_large_envelope(request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return response;
    }

    ApiError {
        error: ChatError::PayloadTooLarge { limit: MAX_BODY_BYTES },
        path,
    }
    .into_response()
}
