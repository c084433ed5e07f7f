//! Character-by-character delivery of a completed reply.
//!
//! The whole reply is computed first, then re-emitted one Unicode scalar at a
//! time as `data: {json}\n\n` frames. This is not upstream token streaming.
//!
//! ```text
//! PENDING ──▶ COMPUTING ──ok──▶ EMITTING(char 0..n) ──▶ DONE  (end event)
//!                 │
//!                 └──err──▶ ERROR  (single error event)
//! ```

use crate::chat::ChatService;
use crate::error::ChatError;
use futures_util::Stream;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// One frame of a streaming reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Char { char: char },
    End { session_id: String },
    Error { error: String },
}

/// Payload first, then `type`; `end` leads with `type`.
impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut event = serializer.serialize_struct("StreamEvent", 2)?;
        match self {
            Self::Char { char } => {
                event.serialize_field("char", char)?;
                event.serialize_field("type", "char")?;
            }
            Self::End { session_id } => {
                event.serialize_field("type", "end")?;
                event.serialize_field("session_id", session_id)?;
            }
            Self::Error { error } => {
                event.serialize_field("error", error)?;
                event.serialize_field("type", "error")?;
            }
        }
        event.end()
    }
}

impl StreamEvent {
    /// Encode as a `data:` frame terminated by a blank line.
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"event encoding failed","type":"error"}"#.to_string());
        format!("data: {json}\n\n")
    }
}

/// Stream the reply to `message` for `session_id`.
///
/// The completion runs on its own task, started immediately. Dropping the
/// stream stops emission but the completion still finishes and its exchange
/// is still recorded.
pub fn chat_stream(
    service: Arc<ChatService>,
    session_id: String,
    message: String,
    delay: Duration,
) -> impl Stream<Item = Result<String, Infallible>> {
    let task = {
        let session_id = session_id.clone();
        tokio::spawn(async move { service.handle(&session_id, &message).await })
    };

    async_stream::stream! {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ChatError::Internal(format!("completion task failed: {e}"))),
        };

        match outcome {
            Ok(reply) => {
                let total = reply.response.chars().count();
                for (i, c) in reply.response.chars().enumerate() {
                    yield Ok(StreamEvent::Char { char: c }.to_frame());
                    if !delay.is_zero() && i + 1 < total {
                        tokio::time::sleep(delay).await;
                    }
                }
                tracing::debug!(session_id = %session_id, chars = total, "Stream completed");
                yield Ok(StreamEvent::End { session_id }.to_frame());
            }
            Err(e) => {
                e.log();
                yield Ok(StreamEvent::Error { error: e.public_message() }.to_frame());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::tests::{failure, ScriptedClient};
    use crate::session::InMemorySessionStore;
    use futures_util::StreamExt;

    fn service(client: ScriptedClient) -> Arc<ChatService> {
        Arc::new(ChatService::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(client),
            "",
        ))
    }

    async fn collect(stream: impl Stream<Item = Result<String, Infallible>>) -> Vec<serde_json::Value> {
        let frames: Vec<String> = stream.map(|f| f.unwrap_or_default()).collect().await;
        frames
            .iter()
            .map(|f| {
                assert!(f.starts_with("data: ") && f.ends_with("\n\n"), "bad frame: {f:?}");
                serde_json::from_str(f.trim_start_matches("data: ").trim_end()).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_frame_format() {
        assert_eq!(
            StreamEvent::Char { char: 'H' }.to_frame(),
            "data: {\"char\":\"H\",\"type\":\"char\"}\n\n"
        );
        assert_eq!(
            StreamEvent::End { session_id: "s1".into() }.to_frame(),
            "data: {\"type\":\"end\",\"session_id\":\"s1\"}\n\n"
        );
        assert_eq!(
            StreamEvent::Error { error: "down".into() }.to_frame(),
            "data: {\"error\":\"down\",\"type\":\"error\"}\n\n"
        );
    }

    #[tokio::test]
    async fn emits_one_event_per_char_then_end() {
        let svc = service(ScriptedClient::new(vec![Ok("Hi 👋".into())]));
        let events = collect(chat_stream(svc.clone(), "s1".into(), "Hello".into(), Duration::ZERO)).await;

        assert_eq!(events.len(), 4 + 1);
        let chars: String = events[..4].iter().map(|e| e["char"].as_str().unwrap()).collect();
        assert_eq!(chars, "Hi 👋");
        assert!(events[..4].iter().all(|e| e["type"] == "char"));
        assert_eq!(events[4], serde_json::json!({"type": "end", "session_id": "s1"}));

        assert_eq!(svc.history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_emits_single_error_event() {
        let svc = service(ScriptedClient::new(vec![Err(failure())]));
        let events = collect(chat_stream(svc.clone(), "s1".into(), "Hello".into(), Duration::ZERO)).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert!(!events[0]["error"].as_str().unwrap().contains("upstream down"));
        assert!(svc.history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_stream_still_records_exchange() {
        let svc = service(ScriptedClient::new(vec![Ok("long answer".into())]));
        let mut stream = Box::pin(chat_stream(
            svc.clone(),
            "s1".into(),
            "Hello".into(),
            Duration::from_millis(50),
        ));
        stream.next().await;
        drop(stream);

        assert_eq!(svc.history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_between_chars() {
        let svc = service(ScriptedClient::new(vec![Ok("abc".into())]));
        let start = tokio::time::Instant::now();
        let events = collect(chat_stream(svc, "s1".into(), "q".into(), Duration::from_millis(20))).await;

        assert_eq!(events.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
