//! Chat Server - Main entry point.

use anyhow::Result;
use chat_common::config::Config;
use chat_common::logging::init_logging;
use chat_common::validation::Validate;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.observability.log_level, &config.observability.log_format);

    tracing::info!("{} v{}", config.project.name, env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    tracing::info!(
        duration_ms = startup_start.elapsed().as_millis() as u64,
        backend = %config.session.backend,
        model = %config.ai.model,
        "Configuration loaded"
    );

    chat_server::start_server(&config).await
}
