//! Configuration management for logsink
//!
//! Settings are layered from:
//! 1. Default values (the `defaults` constants)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! Raw [`TransportSettings`] keep sizes and intervals as the strings the user
//! wrote. [`validate`] turns them into an immutable [`TransportConfig`] and is
//! the only place malformed values are rejected.
//!
//! # Environment Variables
//!
//! `LOGSINK__<key>` or `LOGSINK__<section>__<key>`, for example
//! `LOGSINK__SIZE=50M` or `LOGSINK__COMPRESSION__LEVEL=6`.
//!
//! # Configuration File
//!
//! Loaded from `config/logsink.toml` unless `LOGSINK_CONFIG` names another
//! path.

mod models;
mod sources;
mod validation;

pub use models::{
    defaults, CompressionOptions, PrettyOptions, TransportConfig, TransportSettings,
};
pub use sources::default_path;
pub use validation::{
    validate, validate_interval, validate_size, validate_timestamp_format, ValidationError,
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl TransportSettings {
    /// Load raw settings from the default file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Ok(sources::load()?)
    }

    /// Load raw settings from a specific path and the environment
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        Ok(sources::load_from_sources(path)?)
    }

    pub fn validate(&self) -> Result<TransportConfig, ValidationError> {
        validate(self)
    }
}

impl TransportConfig {
    /// Load and validate configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let settings = TransportSettings::load()?;
        Ok(validate(&settings)?)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let settings = TransportSettings::load_from_path(path)?;
        Ok(validate(&settings)?)
    }
}
