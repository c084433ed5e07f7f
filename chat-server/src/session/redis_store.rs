//! Redis-backed session store with expiry.
//!
//! Each session is a Redis list of JSON-encoded exchanges under
//! `chat_history:{session_id}`. Every append refreshes the key's TTL, so a
//! session expires a fixed time after its last write.

use super::{Exchange, SessionStore, StoreError, StoreResult, Transcript};
use async_trait::async_trait;
use chat_common::config::RedisConfig;
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;

/// Key prefix for session transcripts.
pub const KEY_PREFIX: &str = "chat_history:";

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 100;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Session store persisting transcripts in Redis.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    /// Connect using the given parameters; `ttl_secs` is applied on every write.
    pub async fn connect(config: &RedisConfig, ttl_secs: u64) -> StoreResult<Self> {
        let client = redis::Client::open(config.connection_url())?;
        let conn = client.get_connection_manager().await?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            ttl_secs,
            "Connected to Redis session store"
        );

        Ok(Self { conn, ttl_secs })
    }

    /// Redis key holding the transcript of `session_id`.
    pub fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, session_id: &str) -> StoreResult<Transcript> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(Self::key(session_id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|item| match serde_json::from_str::<Exchange>(item) {
                Ok(exchange) => Some(exchange),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        session_id = %session_id,
                        "Skipping unreadable exchange in Redis transcript"
                    );
                    None
                }
            })
            .collect())
    }

    /// Redis creates the list on first RPUSH, so this is a plain read.
    async fn get_or_create(&self, session_id: &str) -> StoreResult<Transcript> {
        self.get(session_id).await
    }

    async fn append(&self, session_id: &str, exchange: Exchange) -> StoreResult<()> {
        let key = Self::key(session_id);
        let payload = serde_json::to_string(&exchange)?;
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(session_id = %session_id, ttl_secs = self.ttl_secs, "Exchange stored in Redis");
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_ids(&self) -> StoreResult<BTreeSet<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{KEY_PREFIX}*");
        let mut ids = BTreeSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            ids.extend(
                keys.iter()
                    .filter_map(|k| k.strip_prefix(KEY_PREFIX))
                    .map(String::from),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(ids)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        matches!(pong, Ok(ref p) if p == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_prefix_verbatim() {
        assert_eq!(RedisSessionStore::key("s1"), "chat_history:s1");
        assert_eq!(RedisSessionStore::key("a:b*c"), "chat_history:a:b*c");
    }

    #[test]
    fn redis_error_maps_to_backend() {
        let err: StoreError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}

/// Tests against a live server; each test returns early when none is reachable.
#[cfg(test)]
mod live_tests {
    use super::*;

    async fn live_store(ttl_secs: u64) -> Option<RedisSessionStore> {
        let store = RedisSessionStore::connect(&RedisConfig::default(), ttl_secs)
            .await
            .ok()?;
        let healthy = store.health_check().await;
        healthy.then_some(store)
    }

    fn unique_id(tag: &str) -> String {
        format!("test-{tag}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let Some(store) = live_store(60).await else {
            return;
        };
        let id = unique_id("order");

        store.append(&id, Exchange::new("q1", "a1")).await.unwrap();
        store.append(&id, Exchange::new("q2", "a2")).await.unwrap();

        let transcript = store.get(&id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].user, "q1");
        assert_eq!(transcript[1].bot, "a2");

        assert!(store.list_ids().await.unwrap().contains(&id));

        store.clear(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_empty());
        assert!(!store.list_ids().await.unwrap().contains(&id));
    }

    #[tokio::test]
    async fn append_sets_ttl() {
        let Some(store) = live_store(120).await else {
            return;
        };
        let id = unique_id("ttl");
        store.append(&id, Exchange::new("q", "a")).await.unwrap();

        let mut conn = store.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(RedisSessionStore::key(&id))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl <= 120);

        store.clear(&id).await.unwrap();
    }
}
