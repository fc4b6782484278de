use super::models::TransportSettings;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "LOGSINK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/logsink.toml";
const ENV_PREFIX: &str = "LOGSINK";
const ENV_SEPARATOR: &str = "__";

/// Load settings from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<TransportSettings, ConfigError> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    load_from_sources(default_path())
}

/// Path named by `LOGSINK_CONFIG`, or the conventional default
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load settings from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<TransportSettings, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // LOGSINK__RETENTION_DAYS -> retention_days
    // LOGSINK__COMPRESSION__LEVEL -> compression.level
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
