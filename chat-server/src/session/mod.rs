//! Session-scoped conversation storage.
//!
//! A session identifier maps to an ordered transcript of [`Exchange`]s.
//! Identifiers are opaque: they are compared by exact string equality and
//! never parsed.
//!
//! ```text
//!                 ┌──────────────────────┐
//! ChatService ──▶ │  SessionStore trait  │
//!                 └──────────┬───────────┘
//!                ┌───────────┴───────────┐
//!        ┌───────▼───────┐       ┌───────▼───────┐
//!        │  In-memory    │       │  Redis (TTL)  │
//!        │  (process)    │       │  feature-gated│
//!        └───────────────┘       └───────────────┘
//! ```

mod memory;
#[cfg(feature = "redis-backend")]
mod redis_store;

pub use memory::InMemorySessionStore;
#[cfg(feature = "redis-backend")]
pub use redis_store::{RedisSessionStore, KEY_PREFIX};

use async_trait::async_trait;
use chat_common::config::{Config, SessionBackend};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Wall-clock format of [`Exchange::timestamp`] (second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind tag carried by every exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Message,
}

/// One user message and the bot's answer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub timestamp: String,
    pub user: String,
    pub bot: String,
    #[serde(rename = "type", default)]
    pub kind: ExchangeKind,
}

impl Exchange {
    /// Create a message exchange stamped with the current local time.
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self::at(Local::now(), user, bot)
    }

    /// Create a message exchange stamped with a specific time.
    pub fn at(when: DateTime<Local>, user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            timestamp: when.format(TIMESTAMP_FORMAT).to_string(),
            user: user.into(),
            bot: bot.into(),
            kind: ExchangeKind::Message,
        }
    }
}

/// Ordered exchanges of one session, oldest first.
pub type Transcript = Vec<Exchange>;

/// Session store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service failed or is unreachable.
    #[error("Session backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded.
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for session transcripts.
///
/// Implementations must tolerate concurrent calls for different session ids.
/// Calls for the same id are not serialized: two interleaved requests may both
/// read a transcript and then both append.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name (e.g., "memory", "redis").
    fn name(&self) -> &str;

    /// Return the transcript for `session_id`, empty if absent. Never creates a session.
    async fn get(&self, session_id: &str) -> StoreResult<Transcript>;

    /// Return the transcript for `session_id`, creating an empty one if absent.
    ///
    /// For callers about to write; read-only paths use [`get`](Self::get).
    async fn get_or_create(&self, session_id: &str) -> StoreResult<Transcript>;

    /// Append an exchange, creating the transcript if needed.
    async fn append(&self, session_id: &str, exchange: Exchange) -> StoreResult<()>;

    /// Remove every exchange of `session_id`. Unknown ids are a no-op.
    async fn clear(&self, session_id: &str) -> StoreResult<()>;

    /// Ids that hold at least one exchange, sorted.
    ///
    /// Transcripts created by `get_or_create` but never appended to are not listed.
    async fn list_ids(&self) -> StoreResult<BTreeSet<String>>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Build the session store selected by `config.session.backend`.
pub async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.session.backend {
        SessionBackend::Memory => Ok(Arc::new(InMemorySessionStore::new())),
        #[cfg(feature = "redis-backend")]
        SessionBackend::Redis => {
            let store = RedisSessionStore::connect(&config.redis, config.session.ttl_secs).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-backend"))]
        SessionBackend::Redis => anyhow::bail!(
            "session.backend is 'redis' but this binary was built without the \
             `redis-backend` feature. Rebuild with: cargo build --features redis-backend"
        ),
    }
}
