use crate::humanize::{ByteSize, Interval};
use crate::naming::TimestampFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Canonical defaults, shared by `Default` impls and serde field fallbacks
pub mod defaults {
    pub const FILENAME: &str = "app";
    pub const ENABLED: bool = true;
    pub const SIZE: &str = "10M";
    pub const INTERVAL: &str = "1d";
    pub const COMPRESS: bool = true;
    pub const IMMUTABLE: bool = false;
    pub const RETENTION_DAYS: u32 = 30;
    pub const COMPRESSION_LEVEL: u32 = 9;
    pub const COMPRESSION_STRATEGY: u32 = 0;
    pub const TIMESTAMP_FORMAT: &str = "iso";
    pub const SKIP_PRETTY: bool = true;
    pub const ERROR_FLUSH_INTERVAL_MS: u64 = 60_000;
    pub const PRETTY_COLORIZE: bool = false;
    pub const PRETTY_TRANSLATE_TIME: bool = true;
    pub const PRETTY_IGNORE: &[&str] = &["pid", "hostname"];
}

/// Raw transport settings as supplied by the user (file, env, CLI)
///
/// Size, interval and timestamp format stay as strings until
/// [`crate::config::validate`] turns them into a [`TransportConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSettings {
    /// Output directory (required)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Size threshold, e.g. "10M"
    #[serde(default = "default_size")]
    pub size: String,
    /// Time threshold, e.g. "1d"
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_compress")]
    pub compress: bool,
    /// Write each file under its final name instead of renaming the live file
    #[serde(default = "default_immutable")]
    pub immutable: bool,
    /// Days a rotated file is kept; 0 disables the sweeper
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub compression: CompressionOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log_file: Option<PathBuf>,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_skip_pretty")]
    pub skip_pretty: bool,
    #[serde(default = "default_error_flush_interval_ms")]
    pub error_flush_interval_ms: u64,
    #[serde(default)]
    pub pretty: PrettyOptions,
}

impl TransportSettings {
    /// Default settings writing into `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            dir: None,
            filename: default_filename(),
            enabled: default_enabled(),
            size: default_size(),
            interval: default_interval(),
            compress: default_compress(),
            immutable: default_immutable(),
            retention_days: default_retention_days(),
            compression: CompressionOptions::default(),
            error_log_file: None,
            timestamp_format: default_timestamp_format(),
            skip_pretty: default_skip_pretty(),
            error_flush_interval_ms: default_error_flush_interval_ms(),
            pretty: PrettyOptions::default(),
        }
    }
}

fn default_filename() -> String {
    defaults::FILENAME.to_string()
}

fn default_enabled() -> bool {
    defaults::ENABLED
}

fn default_size() -> String {
    defaults::SIZE.to_string()
}

fn default_interval() -> String {
    defaults::INTERVAL.to_string()
}

fn default_compress() -> bool {
    defaults::COMPRESS
}

fn default_immutable() -> bool {
    defaults::IMMUTABLE
}

fn default_retention_days() -> u32 {
    defaults::RETENTION_DAYS
}

fn default_timestamp_format() -> String {
    defaults::TIMESTAMP_FORMAT.to_string()
}

fn default_skip_pretty() -> bool {
    defaults::SKIP_PRETTY
}

fn default_error_flush_interval_ms() -> u64 {
    defaults::ERROR_FLUSH_INTERVAL_MS
}

/// Gzip parameters for rotated files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompressionOptions {
    /// Deflate level, 0 (store) to 9 (best)
    #[serde(default = "default_compression_level")]
    pub level: u32,
    /// zlib strategy constant, 0 (default) to 4 (fixed).
    ///
    /// Validated but not applied: the gzip encoder only takes a level, so
    /// every value compresses like 0. The transport warns when it is set.
    #[serde(default = "default_compression_strategy")]
    pub strategy: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
            strategy: default_compression_strategy(),
        }
    }
}

fn default_compression_level() -> u32 {
    defaults::COMPRESSION_LEVEL
}

fn default_compression_strategy() -> u32 {
    defaults::COMPRESSION_STRATEGY
}

/// Options for the pretty-printing line formatter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrettyOptions {
    #[serde(default = "default_pretty_colorize")]
    pub colorize: bool,
    /// Render numeric epoch-millisecond `time` fields as RFC 3339
    #[serde(default = "default_pretty_translate_time")]
    pub translate_time: bool,
    /// Record keys left out of the rendered line
    #[serde(default = "default_pretty_ignore")]
    pub ignore: Vec<String>,
}

impl Default for PrettyOptions {
    fn default() -> Self {
        Self {
            colorize: default_pretty_colorize(),
            translate_time: default_pretty_translate_time(),
            ignore: default_pretty_ignore(),
        }
    }
}

fn default_pretty_colorize() -> bool {
    defaults::PRETTY_COLORIZE
}

fn default_pretty_translate_time() -> bool {
    defaults::PRETTY_TRANSLATE_TIME
}

fn default_pretty_ignore() -> Vec<String> {
    defaults::PRETTY_IGNORE.iter().map(|s| s.to_string()).collect()
}

/// Validated, immutable transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub dir: PathBuf,
    pub filename: String,
    pub enabled: bool,
    pub size: ByteSize,
    pub interval: Interval,
    pub compress: bool,
    pub immutable: bool,
    pub retention_days: u32,
    pub compression: CompressionOptions,
    pub error_log_file: Option<PathBuf>,
    pub timestamp_format: TimestampFormat,
    pub skip_pretty: bool,
    pub error_flush_interval: Duration,
    pub pretty: PrettyOptions,
}

impl TransportConfig {
    pub fn retention_enabled(&self) -> bool {
        self.retention_days > 0
    }
}
