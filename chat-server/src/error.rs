//! Error types for chat-server.

use crate::provider::ProviderError;
use crate::session::StoreError;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chat_common::util::sanitize_for_log;
use serde::Serialize;

/// Chat service errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Completion service error: {0}")]
    Service(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Service(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire value of the envelope's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::PayloadTooLarge { .. } => "http_error",
            Self::Service(_) => "service_error",
            Self::Store(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a caller. Upstream and backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { .. } => "Request validation failed".into(),
            Self::PayloadTooLarge { .. } => "Request body too large".into(),
            Self::Service(_) => "The AI service is temporarily unavailable".into(),
            Self::Store(_) | Self::Internal(_) => "An internal server error occurred".into(),
        }
    }

    /// Log the full error at a level matching its severity.
    pub fn log(&self) {
        match self {
            Self::Validation { .. } | Self::PayloadTooLarge { .. } => {
                tracing::debug!(error = %self, "Request rejected")
            }
            Self::Service(e) => tracing::error!(
                provider = %e.provider,
                model = %e.model,
                status_code = ?e.status_code,
                error = %sanitize_for_log(&e.message),
                "Completion failed"
            ),
            Self::Store(_) | Self::Internal(_) => {
                tracing::error!(error = %sanitize_for_log(&self.to_string()), "Request failed")
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Error envelope returned to HTTP callers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// A [`ChatError`] bound to the request path it occurred on.
#[derive(Debug)]
pub struct ApiError {
    pub error: ChatError,
    pub path: String,
}

impl ApiError {
    pub fn new(error: impl Into<ChatError>, uri: &Uri) -> Self {
        Self {
            error: error.into(),
            path: uri.path().to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match &self.error {
            ChatError::Validation { field, message } => Some(vec![FieldError {
                field: field.clone(),
                message: message.clone(),
            }]),
            _ => None,
        };

        ErrorBody {
            error: self.error.public_message(),
            kind: self.error.kind(),
            path: self.path.clone(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.error.log();
        (self.error.status(), axum::Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_error() -> ProviderError {
        ProviderError::new("gemini", "m", "API error (500): key=AIzaSecret").with_status(500)
    }

    #[test]
    fn test_status_and_kind() {
        let cases = [
            (ChatError::validation("message", "empty"), 422, "validation_error"),
            (ChatError::Service(provider_error()), 503, "service_error"),
            (ChatError::PayloadTooLarge { limit: 10 }, 413, "http_error"),
            (ChatError::Store(StoreError::Backend("down".into())), 500, "internal_error"),
            (ChatError::Internal("boom".into()), 500, "internal_error"),
        ];
        for (err, status, kind) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_public_message_hides_upstream_detail() {
        let err = ChatError::Service(provider_error());
        assert!(err.to_string().contains("AIzaSecret"));
        assert!(!err.public_message().contains("AIzaSecret"));
    }

    #[test]
    fn test_validation_body_has_details() {
        let uri: Uri = "/api/v1/chat?x=1".parse().unwrap();
        let api = ApiError::new(ChatError::validation("message", "must not be empty"), &uri);
        let body = serde_json::to_value(api.body()).unwrap();

        assert_eq!(body["type"], "validation_error");
        assert_eq!(body["path"], "/api/v1/chat");
        assert_eq!(body["details"][0]["field"], "message");
        assert_eq!(body["details"][0]["message"], "must not be empty");
    }

    #[test]
    fn test_service_body_has_no_details() {
        let uri: Uri = "/chat".parse().unwrap();
        let body = serde_json::to_value(ApiError::new(provider_error(), &uri).body()).unwrap();
        assert_eq!(body["type"], "service_error");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_error_into_response() {
        let uri: Uri = "/chat".parse().unwrap();
        let response = ApiError::new(ChatError::Internal("x".into()), &uri).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
