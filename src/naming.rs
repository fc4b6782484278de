//! Rotated file naming

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Longest file-name component a generated path may carry
pub const MAX_FILENAME_LEN: usize = 200;

/// How the rotation instant is rendered into a rotated file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// `YYYYMMDDHHMMSS` in UTC
    #[default]
    Iso,
    /// Milliseconds since the epoch
    Unix,
    /// UTC calendar string, hyphenated
    Utc,
    /// Local RFC 2822 string, hyphenated
    Rfc2822,
    /// Seconds since the epoch
    Epoch,
}

impl TimestampFormat {
    pub const ALL: [TimestampFormat; 5] = [
        TimestampFormat::Iso,
        TimestampFormat::Unix,
        TimestampFormat::Utc,
        TimestampFormat::Rfc2822,
        TimestampFormat::Epoch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampFormat::Iso => "iso",
            TimestampFormat::Unix => "unix",
            TimestampFormat::Utc => "utc",
            TimestampFormat::Rfc2822 => "rfc2822",
            TimestampFormat::Epoch => "epoch",
        }
    }

    /// Render `instant` for use inside a file name
    pub fn render(&self, instant: DateTime<Utc>) -> String {
        match self {
            TimestampFormat::Iso => instant.format("%Y%m%d%H%M%S").to_string(),
            TimestampFormat::Unix => instant.timestamp_millis().to_string(),
            TimestampFormat::Utc => {
                hyphenate(&instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
            }
            TimestampFormat::Rfc2822 => hyphenate(&instant.with_timezone(&Local).to_rfc2822()),
            TimestampFormat::Epoch => instant.timestamp().to_string(),
        }
    }
}

impl FromStr for TimestampFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimestampFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| {
                format!("expected one of iso, unix, utc, rfc2822, epoch; got '{}'", s)
            })
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse every run of non-alphanumeric characters into one hyphen and trim
/// hyphens from both ends.
fn hyphenate(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Map a rotation instant to a file path.
///
/// `None` names the live file `dir/base.log`; otherwise the name is
/// `base-<timestamp>.log`, clipped to [`MAX_FILENAME_LEN`] characters.
pub fn generate_filename(
    instant: Option<DateTime<Utc>>,
    dir: &Path,
    base_name: &str,
    format: TimestampFormat,
) -> PathBuf {
    let Some(instant) = instant else {
        return dir.join(format!("{}.log", base_name));
    };

    let name = format!("{}-{}.log", base_name, format.render(instant));
    let name: String = if name.chars().count() > MAX_FILENAME_LEN {
        name.chars().take(MAX_FILENAME_LEN).collect()
    } else {
        name
    };

    dir.join(name)
}

/// Naming strategy handed to a rotation engine
#[derive(Debug, Clone)]
pub struct NamingStrategy {
    dir: PathBuf,
    base_name: String,
    format: TimestampFormat,
}

impl NamingStrategy {
    pub fn new(dir: impl Into<PathBuf>, base_name: impl Into<String>, format: TimestampFormat) -> Self {
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn live_path(&self) -> PathBuf {
        generate_filename(None, &self.dir, &self.base_name, self.format)
    }

    pub fn rotated_path(&self, instant: DateTime<Utc>) -> PathBuf {
        generate_filename(Some(instant), &self.dir, &self.base_name, self.format)
    }
}
