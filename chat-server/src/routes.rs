//! HTTP API routes.

use crate::chat::{validate_message, ChatService, SessionInfo, DEFAULT_SESSION_ID};
use crate::error::{ApiError, ChatError, ErrorBody};
use crate::middleware::{
    payload_too_large_envelope, request_logging, security_headers, trusted_host, TrustedHosts,
};
use crate::session::Exchange;
use crate::stream::chat_stream;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, OriginalUri, Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_common::config::{ProjectConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub project: ProjectConfig,
    /// Pause between characters of a streamed reply.
    pub stream_delay: Duration,
}

impl AppState {
    pub fn new(service: Arc<ChatService>, project: ProjectConfig, stream_delay: Duration) -> Self {
        Self {
            service,
            project,
            stream_delay,
        }
    }
}

/// Build the application router.
///
/// Every route is served at the root and again under `server.api_prefix`.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let mut router = Router::new().merge(api_routes());

    let prefix = normalize_prefix(&server.api_prefix);
    if let Some(prefix) = prefix {
        router = router.nest(&prefix, api_routes());
    }

    router
        .fallback(not_found)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(payload_too_large_envelope))
        .layer(middleware::from_fn_with_state(
            Arc::new(TrustedHosts::new(&server.allowed_hosts)),
            trusted_host,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(server))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/chat/history/:session_id", get(get_history).delete(clear_history))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:session_id", get(get_session))
}

/// `"/api/v1/"` → `"/api/v1"`; empty or `"/"` → no prefix.
fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_matches('/');
    (!trimmed.is_empty()).then(|| format!("/{trimmed}"))
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if server.allows_any_origin() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

// ============ Request / Response Types ============

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<Exchange>,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub active_sessions: Vec<String>,
}

/// Unwrap a JSON body, turning extractor rejections into validation errors.
///
/// A body that outgrows the limit while buffering is reported as too large.
fn parse_body(
    payload: Result<Json<ChatRequest>, JsonRejection>,
    uri: &axum::http::Uri,
) -> Result<ChatRequest, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let error = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ChatError::PayloadTooLarge { limit: MAX_BODY_BYTES }
        } else {
            ChatError::validation("body", rejection.body_text())
        };
        ApiError::new(error, uri)
    })
}

// ============ Service Info ============

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": format!("{} API", state.project.name),
        "version": state.project.version,
        "description": state.project.description,
        "status": "running"
    }))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state.service.store_healthy().await;
    let (status, label) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "service": state.project.slug(),
            "store": state.service.store_name()
        })),
    )
}

async fn not_found(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Not Found".into(),
            kind: "http_error",
            path: uri.path().to_string(),
            details: None,
        }),
    )
}

// ============ Chat ============

async fn chat(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let request = parse_body(payload, &uri)?;

    let reply = state
        .service
        .handle(&request.session_id, &request.message)
        .await
        .map_err(|e| ApiError::new(e, &uri))?;

    Ok(Json(ChatResponse {
        response: reply.response,
        session_id: request.session_id,
        timestamp: reply.timestamp,
    }))
}

async fn chat_stream_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = parse_body(payload, &uri)?;
    validate_message(&request.message).map_err(|e| ApiError::new(e, &uri))?;

    let events = chat_stream(
        state.service.clone(),
        request.session_id,
        request.message,
        state.stream_delay,
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(events),
    )
        .into_response())
}

// ============ History & Sessions ============

async fn get_history(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let messages = state
        .service
        .history(&session_id)
        .await
        .map_err(|e| ApiError::new(e, &uri))?;

    Ok(Json(HistoryResponse {
        messages,
        session_id,
    }))
}

async fn clear_history(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .service
        .clear(&session_id)
        .await
        .map_err(|e| ApiError::new(e, &uri))?;

    Ok(Json(MessageResponse {
        message: format!("Conversation history for session {session_id} has been cleared."),
    }))
}

async fn list_sessions(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<SessionsResponse>, ApiError> {
    let ids = state
        .service
        .active_sessions()
        .await
        .map_err(|e| ApiError::new(e, &uri))?;

    Ok(Json(SessionsResponse {
        active_sessions: ids.into_iter().collect(),
    }))
}

async fn get_session(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let info = state
        .service
        .session_info(&session_id)
        .await
        .map_err(|e| ApiError::new(e, &uri))?;
    Ok(Json(info))
}
