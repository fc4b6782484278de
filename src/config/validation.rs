use super::models::{CompressionOptions, TransportConfig, TransportSettings};
use crate::humanize::{ByteSize, Interval};
use crate::naming::TimestampFormat;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Output directory is required")]
    MissingDirectory,
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl ToString) -> Self {
        ValidationError::InvalidConfig {
            field,
            reason: reason.to_string(),
        }
    }

    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::InvalidConfig { field, .. } => *field,
            ValidationError::MissingDirectory => "dir",
        }
    }
}

/// Validate raw settings into a [`TransportConfig`]
///
/// Runs to completion before anything touches the filesystem.
pub fn validate(settings: &TransportSettings) -> Result<TransportConfig, ValidationError> {
    let dir = match &settings.dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
        _ => return Err(ValidationError::MissingDirectory),
    };

    validate_filename(&settings.filename)?;
    let size = validate_size(&settings.size)?;
    let interval = validate_interval(&settings.interval)?;
    let timestamp_format = validate_timestamp_format(&settings.timestamp_format)?;
    validate_compression(&settings.compression)?;
    let error_flush_interval = validate_flush_interval(settings.error_flush_interval_ms)?;

    Ok(TransportConfig {
        dir,
        filename: settings.filename.clone(),
        enabled: settings.enabled,
        size,
        interval,
        compress: settings.compress,
        immutable: settings.immutable,
        retention_days: settings.retention_days,
        compression: settings.compression,
        error_log_file: settings.error_log_file.clone(),
        timestamp_format,
        skip_pretty: settings.skip_pretty,
        error_flush_interval,
        pretty: settings.pretty.clone(),
    })
}

/// Parse a size threshold such as `"10K"`
pub fn validate_size(raw: &str) -> Result<ByteSize, ValidationError> {
    raw.parse::<ByteSize>()
        .map_err(|e| ValidationError::invalid("size", format!("'{}': {}", raw, e)))
}

/// Parse a rotation interval such as `"1d"`
pub fn validate_interval(raw: &str) -> Result<Interval, ValidationError> {
    raw.parse::<Interval>()
        .map_err(|e| ValidationError::invalid("interval", format!("'{}': {}", raw, e)))
}

/// Parse a timestamp format literal
pub fn validate_timestamp_format(raw: &str) -> Result<TimestampFormat, ValidationError> {
    raw.parse::<TimestampFormat>()
        .map_err(|e| ValidationError::invalid("timestamp_format", e))
}

/// Base names must be usable as a single path component
fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.is_empty() {
        return Err(ValidationError::invalid("filename", "must not be empty"));
    }
    if filename.contains(|c: char| c == '/' || c == '\\') {
        return Err(ValidationError::invalid(
            "filename",
            format!("'{}' must not contain path separators", filename),
        ));
    }
    Ok(())
}

fn validate_compression(options: &CompressionOptions) -> Result<(), ValidationError> {
    if options.level > 9 {
        return Err(ValidationError::invalid(
            "compression.level",
            format!("{} is outside 0..=9", options.level),
        ));
    }
    if options.strategy > 4 {
        return Err(ValidationError::invalid(
            "compression.strategy",
            format!("{} is outside 0..=4", options.strategy),
        ));
    }
    Ok(())
}

fn validate_flush_interval(ms: u64) -> Result<Duration, ValidationError> {
    if ms == 0 {
        return Err(ValidationError::invalid(
            "error_flush_interval_ms",
            "must be greater than zero",
        ));
    }
    Ok(Duration::from_millis(ms))
}
