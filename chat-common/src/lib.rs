//! Chat Common - shared configuration, errors, and logging for the chat backend.
//!
//! This crate provides:
//! - Configuration types and loading (file, `.env`, environment)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Log-safe string helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    AiConfig, Config, ObservabilityConfig, ProjectConfig, RedisConfig, ServerConfig,
    SessionBackend, SessionConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};
