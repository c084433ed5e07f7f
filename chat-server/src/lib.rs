//! Chat Server - session-scoped chat relayed to Google Gemini.
//!
//! This crate provides:
//! - Session transcripts in process memory or Redis (`redis-backend` feature)
//! - A stateless completion client for the Gemini `generateContent` API
//! - The conversation orchestrator tying the two together
//! - HTTP routes, including a character-by-character streaming reply
//!
//! ## Architecture
//!
//! ```text
//! Client → routes → ChatService ─┬─▶ SessionStore (memory | redis)
//!                                └─▶ CompletionClient (Gemini)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod error;
pub mod middleware;
pub mod provider;
pub mod routes;
pub mod session;
pub mod stream;

pub use chat::{ChatReply, ChatService, SessionInfo};
pub use error::{ApiError, ChatError};
pub use provider::{CompletionClient, CompletionRequest, CompletionSettings, GeminiClient, ProviderError, Role, Turn};
pub use routes::{build_router, AppState};
pub use session::{create_store, Exchange, InMemorySessionStore, SessionStore, StoreError, Transcript};

use axum::Router;
use chat_common::config::Config;
use std::sync::Arc;
use std::time::Duration;

/// Assemble the router from explicit store and client instances.
pub fn build_app(
    config: &Config,
    store: Arc<dyn SessionStore>,
    client: Arc<dyn CompletionClient>,
) -> Router {
    let service = Arc::new(ChatService::new(store, client, config.ai.system_prompt.clone()));
    let state = AppState::new(
        service,
        config.project.clone(),
        Duration::from_millis(config.session.stream_delay_ms),
    );
    build_router(state, &config.server)
}

/// Start the chat server and run until Ctrl-C.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let settings = CompletionSettings::from_config(&config.ai)
        .ok_or_else(|| anyhow::anyhow!("GOOGLE_API_KEY is not set"))?;

    let store = create_store(config).await?;
    let client = GeminiClient::new(settings);

    tracing::info!(
        store = store.name(),
        model = client.model(),
        "Chat service ready"
    );

    let router = build_app(config, store, Arc::new(client));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Chat server listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
