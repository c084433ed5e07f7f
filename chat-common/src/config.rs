//! Configuration management for the chat backend.
//!
//! # Configuration Priority
//!
//! 1. Default values
//! 2. JSON config file (`$CHAT_CONFIG`, `./config.json`, or `~/.gemini-chat/config.json`)
//! 3. Variables from a `.env` file in the working directory
//! 4. Process environment variables
//!
//! # Environment Variable Mapping
//!
//! ## Completion service
//! - `GOOGLE_API_KEY` / `GEMINI_API_KEY` → ai.api_key
//! - `AI_MODEL` → ai.model
//! - `AI_TEMPERATURE` → ai.temperature
//! - `AI_MAX_TOKENS` → ai.max_tokens
//! - `AI_BASE_URL` → ai.base_url
//!
//! ## Server
//! - `HOST` → server.host
//! - `PORT` → server.port
//! - `ALLOWED_HOSTS` → server.allowed_origins and server.allowed_hosts (comma-separated)
//!
//! ## Sessions
//! - `SESSION_BACKEND` → session.backend (`memory` | `redis`)
//! - `SESSION_TTL_SECS` → session.ttl_secs
//! - `STREAM_DELAY_MS` → session.stream_delay_ms
//! - `REDIS_URL`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB` → redis.*
//!
//! ## Logging
//! - `LOG_LEVEL` → observability.log_level
//! - `LOG_FORMAT` → observability.log_format

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result, ResultExt};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CHAT_CONFIG";

/// Get the per-user configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".gemini-chat"),
        |dirs| dirs.home_dir().join(".gemini-chat"),
    )
}

/// Get the per-user configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Sections
// ============================================================================

/// Project metadata reported by the liveness endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default = "default_project_version")]
    pub version: String,
    #[serde(default = "default_project_description")]
    pub description: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            version: default_project_version(),
            description: default_project_description(),
        }
    }
}

impl ProjectConfig {
    /// Service identifier derived from the project name ("Gemini Chatbot API" → "gemini-chatbot-api").
    pub fn slug(&self) -> String {
        self.name.to_lowercase().replace(' ', "-")
    }
}

fn default_project_name() -> String {
    "Gemini Chatbot API".into()
}

fn default_project_version() -> String {
    "1.0.0".into()
}

fn default_project_description() -> String {
    "AI chatbot API service".into()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS origins; `*` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Accepted `Host` header values. `*` accepts any host and `*.example.com`
    /// any subdomain of `example.com`.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
    /// Versioned prefix the API is additionally mounted under.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            allowed_hosts: default_allowed_hosts(),
            api_prefix: default_api_prefix(),
        }
    }
}

impl ServerConfig {
    /// Whether CORS should accept any origin.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["*".into()]
}

fn default_api_prefix() -> String {
    "/api/v1".into()
}

/// Completion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Google API key; required at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum output tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> i64 {
    1000
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_system_prompt() -> String {
    "You are a helpful and friendly AI assistant. \
     Give accurate and useful answers to the user's questions. \
     Converse naturally in Korean."
        .into()
}

/// Where session transcripts live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Process-local map; transcripts live until the process exits.
    #[default]
    Memory,
    /// Redis lists with a TTL refreshed on every write.
    Redis,
}

impl FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown session backend '{other}'")),
        }
    }
}

impl std::fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Session storage and delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: SessionBackend,
    /// Expiry for the Redis backend, measured from the last write.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Delay between characters in streaming responses.
    #[serde(default = "default_stream_delay_ms")]
    pub stream_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            ttl_secs: default_session_ttl_secs(),
            stream_delay_ms: default_stream_delay_ms(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    86_400
}

fn default_stream_delay_ms() -> u64 {
    20
}

/// Redis connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over the individual fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub db: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Connection URL for the redis client.
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

fn default_redis_host() -> String {
    "localhost".into()
}

fn default_redis_port() -> u16 {
    6379
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the first config file found, then apply `.env`
    /// and process environment overrides.
    pub fn load() -> Result<Self> {
        // A missing .env file is the normal case.
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        let mut config = match Self::locate_file()? {
            Some(path) => Self::load_from(&path)?,
            None => {
                tracing::info!("Config file not found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path (no environment overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Resolve the config file: an explicit `CHAT_CONFIG` must exist, the
    /// implicit locations are optional.
    fn locate_file() -> Result<Option<PathBuf>> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(shellexpand::tilde(&explicit).into_owned());
            if !path.exists() {
                return Err(Error::Config(format!(
                    "{CONFIG_PATH_ENV} points to {}, which does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path));
        }

        Ok([PathBuf::from("config.json"), config_path()]
            .into_iter()
            .find(|p| p.exists()))
    }

    /// Apply process environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Unparseable numeric values are ignored with a warning so a typo never
    /// silently zeroes a setting.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GOOGLE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            if !key.trim().is_empty() {
                self.ai.api_key = Some(key);
            }
        }
        if let Some(model) = lookup("AI_MODEL") {
            self.ai.model = model;
        }
        parse_into(&lookup, "AI_TEMPERATURE", &mut self.ai.temperature);
        parse_into(&lookup, "AI_MAX_TOKENS", &mut self.ai.max_tokens);
        if let Some(url) = lookup("AI_BASE_URL") {
            self.ai.base_url = url;
        }

        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        parse_into(&lookup, "PORT", &mut self.server.port);
        if let Some(hosts) = lookup("ALLOWED_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            self.server.allowed_origins = hosts.clone();
            self.server.allowed_hosts = hosts;
        }

        parse_into(&lookup, "SESSION_BACKEND", &mut self.session.backend);
        parse_into(&lookup, "SESSION_TTL_SECS", &mut self.session.ttl_secs);
        parse_into(&lookup, "STREAM_DELAY_MS", &mut self.session.stream_delay_ms);

        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = Some(url);
        }
        if let Some(host) = lookup("REDIS_HOST") {
            self.redis.host = host;
        }
        parse_into(&lookup, "REDIS_PORT", &mut self.redis.port);
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.redis.password = Some(password);
        }
        parse_into(&lookup, "REDIS_DB", &mut self.redis.db);

        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.log_level = level.to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.observability.log_format = format.to_lowercase();
        }
    }

    /// Socket address string the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.api_prefix, "/api/v1");
        assert_eq!(config.ai.model, "gemini-2.0-flash-exp");
        assert!((config.ai.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.ai.max_tokens, 1000);
        assert_eq!(config.session.backend, SessionBackend::Memory);
        assert_eq!(config.session.ttl_secs, 86_400);
        assert_eq!(config.session.stream_delay_ms, 20);
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_bind_address() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 9001;
        assert_eq!(config.bind_address(), "127.0.0.1:9001");
    }

    #[test]
    fn test_project_slug() {
        assert_eq!(ProjectConfig::default().slug(), "gemini-chatbot-api");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("GOOGLE_API_KEY", "g-key"),
            ("AI_MODEL", "gemini-1.5-pro"),
            ("AI_TEMPERATURE", "0.2"),
            ("AI_MAX_TOKENS", "256"),
            ("PORT", "9000"),
            ("ALLOWED_HOSTS", "a.test, *.b.test"),
            ("SESSION_BACKEND", "redis"),
            ("SESSION_TTL_SECS", "60"),
            ("REDIS_HOST", "cache"),
            ("REDIS_PORT", "6380"),
            ("LOG_LEVEL", "DEBUG"),
        ]));

        assert_eq!(config.ai.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.ai.model, "gemini-1.5-pro");
        assert!((config.ai.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.ai.max_tokens, 256);
        assert_eq!(config.server.port, 9000);
        let hosts = vec!["a.test".to_string(), "*.b.test".to_string()];
        assert_eq!(config.server.allowed_origins, hosts);
        assert_eq!(config.server.allowed_hosts, hosts);
        assert!(!config.server.allows_any_origin());
        assert_eq!(config.session.backend, SessionBackend::Redis);
        assert_eq!(config.session.ttl_secs, 60);
        assert_eq!(config.redis.host, "cache");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_gemini_key_fallback_and_blank_key_ignored() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("GEMINI_API_KEY", "gm-key")]));
        assert_eq!(config.ai.api_key.as_deref(), Some("gm-key"));

        let mut config = Config::default();
        config.apply_overrides(env(&[("GOOGLE_API_KEY", "   ")]));
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_unparseable_override_keeps_previous_value() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("PORT", "eighty"), ("SESSION_BACKEND", "etcd")]));
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.backend, SessionBackend::Memory);
    }

    #[test]
    fn test_redis_connection_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.connection_url(), "redis://localhost:6379/0");

        redis.password = Some("s3cret".into());
        redis.db = 2;
        assert_eq!(redis.connection_url(), "redis://:s3cret@localhost:6379/2");

        redis.password = Some(String::new());
        assert_eq!(redis.connection_url(), "redis://localhost:6379/2");

        redis.url = Some("redis://cache:7000".into());
        assert_eq!(redis.connection_url(), "redis://cache:7000");
    }

    #[test]
    fn test_load_from_file_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "ai": { "model": "gemini-1.5-flash" }, "session": { "backend": "redis" } }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.ai.model, "gemini-1.5-flash");
        assert_eq!(config.ai.max_tokens, 1000);
        assert_eq!(config.session.backend, SessionBackend::Redis);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_load_from_invalid_json_has_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_session_backend_from_str() {
        assert_eq!("Redis".parse::<SessionBackend>(), Ok(SessionBackend::Redis));
        assert_eq!("in-memory".parse::<SessionBackend>(), Ok(SessionBackend::Memory));
        assert!("sqlite".parse::<SessionBackend>().is_err());
        assert_eq!(SessionBackend::Redis.to_string(), "redis");
    }
}
