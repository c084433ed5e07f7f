//! Conversation orchestration.
//!
//! [`ChatService`] ties a [`SessionStore`] to a [`CompletionClient`]: it reads
//! the session transcript, asks the client for a reply with that transcript as
//! context, and records the exchange only when the reply succeeded.

use crate::error::ChatError;
use crate::provider::{CompletionClient, CompletionRequest, Turn};
use crate::session::{Exchange, SessionStore, Transcript};
use chat_common::util::truncate_with_ellipsis;
use chrono::Local;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Maximum accepted message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Session id used when a request omits one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// A generated reply.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    /// ISO-8601 local time of the reply.
    pub timestamp: String,
}

/// Summary of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: usize,
    pub last_activity: Option<String>,
}

/// Check a user message before it reaches the completion service.
pub fn validate_message(message: &str) -> Result<(), ChatError> {
    if message.is_empty() {
        return Err(ChatError::validation("message", "Message must not be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::validation(
            "message",
            format!("Message must be at most {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    Ok(())
}

pub struct ChatService {
    store: Arc<dyn SessionStore>,
    client: Arc<dyn CompletionClient>,
    system_prompt: String,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        client: Arc<dyn CompletionClient>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            client,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.health_check().await
    }

    /// Answer `message` in the context of `session_id` and record the exchange.
    ///
    /// The transcript is left untouched when validation or the completion fails.
    pub async fn handle(&self, session_id: &str, message: &str) -> Result<ChatReply, ChatError> {
        validate_message(message)?;

        let transcript = self.store.get_or_create(session_id).await?;
        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            history: Turn::from_transcript(&transcript),
            message: message.to_string(),
        };

        let start = Instant::now();
        let response = self.client.complete(request).await?;

        tracing::info!(
            session_id = %session_id,
            client = self.client.name(),
            prior_exchanges = transcript.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            message = %truncate_with_ellipsis(message, 50),
            "Reply generated"
        );

        self.store
            .append(session_id, Exchange::new(message, response.as_str()))
            .await?;

        Ok(ChatReply {
            response,
            timestamp: Local::now().to_rfc3339(),
        })
    }

    pub async fn history(&self, session_id: &str) -> Result<Transcript, ChatError> {
        Ok(self.store.get(session_id).await?)
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), ChatError> {
        self.store.clear(session_id).await?;
        tracing::info!(session_id = %session_id, "Conversation history cleared");
        Ok(())
    }

    pub async fn active_sessions(&self) -> Result<BTreeSet<String>, ChatError> {
        Ok(self.store.list_ids().await?)
    }

    pub async fn session_info(&self, session_id: &str) -> Result<SessionInfo, ChatError> {
        let transcript = self.store.get(session_id).await?;
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            message_count: transcript.len(),
            last_activity: transcript.last().map(|e| e.timestamp.clone()),
        })
    }
}
