//! Completion service abstraction.
//!
//! A [`CompletionClient`] turns a system instruction, the prior turns of a
//! conversation, and a new user message into generated text. Clients are
//! stateless: the caller supplies the whole context on every call.

mod gemini;

pub use gemini::GeminiClient;

use crate::session::Exchange;
use async_trait::async_trait;
use chat_common::config::AiConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Client Trait
// ============================================================================

/// Single-call interface to a text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Client name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate a reply. One attempt, no retry.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

/// Error from the completion service.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Request Types
// ============================================================================

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One prior message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }

    /// Expand a transcript into turns: each exchange becomes a user turn
    /// followed by a model turn.
    pub fn from_transcript(transcript: &[Exchange]) -> Vec<Turn> {
        transcript
            .iter()
            .flat_map(|e| [Turn::user(&e.user), Turn::model(&e.bot)])
            .collect()
    }
}

/// Input for a single completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System instruction
    pub system: String,
    /// Prior turns, oldest first
    pub history: Vec<Turn>,
    /// New user message
    pub message: String,
}

/// Per-client settings.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: i64,
    pub base_url: String,
    pub timeout: Duration,
}

impl CompletionSettings {
    /// Settings from the `ai` config section. Returns `None` without an API key.
    pub fn from_config(config: &AiConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        Some(Self {
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}
