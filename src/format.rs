//! Optional formatting step in front of the rotation engine

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::config::PrettyOptions;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("log line is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("log line is not a JSON object")]
    NotAnObject,
}

/// Turns one inbound log line into the bytes written to disk
pub trait LineFormatter: Send + Sync {
    fn format(&self, line: &[u8]) -> Result<Vec<u8>, FormatError>;
}

/// Identity transform
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl LineFormatter for Passthrough {
    fn format(&self, line: &[u8]) -> Result<Vec<u8>, FormatError> {
        Ok(line.to_vec())
    }
}

/// Renders JSON log records as `[time] LEVEL: msg {extra}`
#[derive(Debug, Clone)]
pub struct PrettyFormatter {
    options: PrettyOptions,
}

const RESET: &str = "\x1b[0m";

impl PrettyFormatter {
    pub fn new(options: PrettyOptions) -> Self {
        Self { options }
    }

    fn level_label(level: Option<&Value>) -> (&'static str, &'static str) {
        // Numeric levels follow the 10/20/30/40/50/60 convention
        let label = match level {
            Some(Value::Number(n)) => match n.as_u64().unwrap_or(30) {
                0..=10 => "TRACE",
                11..=20 => "DEBUG",
                21..=30 => "INFO",
                31..=40 => "WARN",
                41..=50 => "ERROR",
                _ => "FATAL",
            },
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "trace" => "TRACE",
                "debug" => "DEBUG",
                "warn" | "warning" => "WARN",
                "error" => "ERROR",
                "fatal" | "critical" => "FATAL",
                _ => "INFO",
            },
            _ => "INFO",
        };

        let color = match label {
            "TRACE" => "\x1b[90m",
            "DEBUG" => "\x1b[34m",
            "INFO" => "\x1b[32m",
            "WARN" => "\x1b[33m",
            "ERROR" => "\x1b[31m",
            _ => "\x1b[35m",
        };
        (label, color)
    }

    fn render_time(&self, time: Option<&Value>) -> Option<String> {
        match time? {
            Value::Number(n) if self.options.translate_time => {
                let millis = n.as_i64()?;
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl LineFormatter for PrettyFormatter {
    fn format(&self, line: &[u8]) -> Result<Vec<u8>, FormatError> {
        let value: Value = serde_json::from_slice(trim_newline(line))?;
        let Value::Object(mut record) = value else {
            return Err(FormatError::NotAnObject);
        };

        let time = record.remove("time");
        let level = record.remove("level");
        let msg = record.remove("msg");
        for key in &self.options.ignore {
            record.remove(key);
        }

        let mut out = String::new();
        if let Some(time) = self.render_time(time.as_ref()) {
            out.push('[');
            out.push_str(&time);
            out.push_str("] ");
        }

        let (label, color) = Self::level_label(level.as_ref());
        if self.options.colorize {
            out.push_str(color);
            out.push_str(label);
            out.push_str(RESET);
        } else {
            out.push_str(label);
        }
        out.push(':');

        match msg {
            Some(Value::String(msg)) => {
                out.push(' ');
                out.push_str(&msg);
            }
            Some(other) => {
                out.push(' ');
                out.push_str(&other.to_string());
            }
            None => {}
        }

        if !record.is_empty() {
            out.push(' ');
            out.push_str(&Value::Object(record).to_string());
        }
        out.push('\n');

        Ok(out.into_bytes())
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Formatter selected by configuration
pub fn formatter_for(skip_pretty: bool, options: &PrettyOptions) -> Box<dyn LineFormatter> {
    if skip_pretty {
        Box::new(Passthrough)
    } else {
        Box::new(PrettyFormatter::new(options.clone()))
    }
}
