//! Configuration validation.
//!
//! Checks that required values are present and numeric settings are within
//! the ranges the completion service and server accept.

use thiserror::Error;

use crate::config::{AiConfig, Config, ObservabilityConfig, ServerConfig, SessionConfig};
use crate::logging::LogFormat;

/// Log levels accepted by `init_logging`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.ai.validate(),
            self.server.validate(),
            self.session.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for AiConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ValidationError::MissingField {
                field: "ai.api_key (GOOGLE_API_KEY)".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "ai.model".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "ai.temperature".into(),
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.max_tokens <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "ai.max_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidValue {
                field: "server.port".into(),
                reason: "must be between 1 and 65535".into(),
            });
        }
        if !self.api_prefix.starts_with('/') || self.api_prefix.len() < 2 {
            return Err(ValidationError::InvalidValue {
                field: "server.api_prefix".into(),
                reason: format!("'{}' must start with '/' and name a path", self.api_prefix),
            });
        }
        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.ttl_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("'{}' is not one of {:?}", self.log_level, LOG_LEVELS),
            });
        }
        if let Err(reason) = self.log_format.parse::<LogFormat>() {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason,
            });
        }
        Ok(())
    }
}
