//! Process-local session store.

use super::{Exchange, SessionStore, StoreResult, Transcript};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// In-memory session store; transcripts live until the process exits or are cleared.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Transcript>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held in memory.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, session_id: &str) -> StoreResult<Transcript> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn get_or_create(&self, session_id: &str) -> StoreResult<Transcript> {
        if let Some(transcript) = self.sessions.read().await.get(session_id) {
            return Ok(transcript.clone());
        }

        let mut sessions = self.sessions.write().await;
        Ok(sessions.entry(session_id.to_string()).or_default().clone())
    }

    async fn append(&self, session_id: &str, exchange: Exchange) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(exchange);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> StoreResult<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn list_ids(&self) -> StoreResult<BTreeSet<String>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .filter(|(_, transcript)| !transcript.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn unknown_session_reads_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.get("s1").await.unwrap().is_empty());
        assert!(store.get_or_create("s2").await.unwrap().is_empty());
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn reads_never_insert_sessions() {
        let store = InMemorySessionStore::new();
        for i in 0..1000 {
            assert!(store.get(&format!("unknown-{i}")).await.unwrap().is_empty());
        }

        assert_eq!(store.session_count().await, 0);
        assert!(store.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = InMemorySessionStore::new();
        for i in 0..5 {
            store
                .append("s1", Exchange::new(format!("q{i}"), format!("a{i}")))
                .await
                .unwrap();
        }

        let transcript = store.get("s1").await.unwrap();
        let users: Vec<_> = transcript.iter().map(|e| e.user.as_str()).collect();
        assert_eq!(users, ["q0", "q1", "q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn clear_removes_transcript_and_unknown_is_noop() {
        let store = InMemorySessionStore::new();
        store.append("s1", Exchange::new("q", "a")).await.unwrap();

        store.clear("s1").await.unwrap();
        store.clear("never-used").await.unwrap();

        assert!(store.get("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_ids_is_sorted_and_skips_read_only_ids() {
        let store = InMemorySessionStore::new();
        store.get("read-only").await.unwrap();
        store.get_or_create("empty").await.unwrap();
        store.append("b", Exchange::new("q", "a")).await.unwrap();
        store.append("a", Exchange::new("q", "a")).await.unwrap();

        let ids: Vec<_> = store.list_ids().await.unwrap().into_iter().collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn ids_are_opaque_strings() {
        let store = InMemorySessionStore::new();
        store.append("../etc/passwd", Exchange::new("q", "a")).await.unwrap();
        store.append("Default", Exchange::new("q", "a")).await.unwrap();

        assert!(store.get("default").await.unwrap().is_empty());
        assert_eq!(store.get("../etc/passwd").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_to_distinct_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut handles = Vec::new();
        for s in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .append(&format!("s{s}"), Exchange::new(format!("{i}"), "a"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list_ids().await.unwrap().len(), 8);
        for s in 0..8 {
            let transcript = store.get(&format!("s{s}")).await.unwrap();
            assert_eq!(transcript.len(), 25);
            assert_eq!(transcript[24].user, "24");
        }
    }
}
