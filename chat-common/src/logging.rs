//! Logging setup for the chat services.
//!
//! Events go through `tracing`, rendered either as human-readable lines or
//! one JSON object per event. HTTP and Redis client crates log at `warn` so
//! request handling stays readable at `info`; `RUST_LOG` replaces the whole
//! filter when set.

use std::str::FromStr;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Client and transport crates capped at `warn`.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tower_http",
    "redis",
];

/// Output rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// `"debug"` → `"debug,hyper=warn,reqwest=warn,..."`.
fn directives(log_level: &str) -> String {
    NOISY_MODULES
        .iter()
        .fold(log_level.to_string(), |acc, module| format!("{acc},{module}=warn"))
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(log_level)))
}

/// Install the global subscriber.
///
/// An unrecognized `log_format` falls back to pretty output. Only the first
/// call installs anything; later calls are no-ops.
pub fn init_logging(log_level: &str, log_format: &str) {
    let format = log_format.parse::<LogFormat>().unwrap_or_default();
    let registry = tracing_subscriber::registry().with(env_filter(log_level));

    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(true).with_target(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(level = %log_level, format = ?format, "Logging initialized");
    }
}

/// Fresh id correlating the log lines of one request.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `info`-level span for one HTTP request, tagged with its trace id.
///
/// ```ignore
/// let span = request_span!("http_request", trace_id, method = %method, path = %path);
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $trace_id:expr) => {
        tracing::info_span!($name, trace_id = %$trace_id)
    };
    ($name:expr, $trace_id:expr, $($field:tt)*) => {
        tracing::info_span!($name, trace_id = %$trace_id, $($field)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_cap_noisy_modules() {
        let d = directives("debug");
        assert!(d.starts_with("debug,"));
        assert!(d.contains(",reqwest=warn"));
        assert!(d.contains(",redis=warn"));
        assert_eq!(d.matches("=warn").count(), NOISY_MODULES.len());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_trace_ids_are_unique_uuids() {
        let a = generate_trace_id();
        let b = generate_trace_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("info", "pretty");
        init_logging("debug", "json");
    }
}
