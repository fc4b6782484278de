//! Human-readable size and interval parsing utilities

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;
/// Calendar months are treated as 30 days for threshold arithmetic
const SECS_PER_MONTH: u64 = 30 * SECS_PER_DAY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected <positive integer><unit>, got '{0}'")]
    InvalidFormat(String),

    #[error("magnitude must be greater than zero")]
    NonPositive,

    #[error("magnitude too large: {0}")]
    Overflow(String),

    #[error("unknown unit '{0}'")]
    InvalidUnit(String),
}

/// Split `"<digits><unit>"` into its magnitude and unit suffix.
fn split_magnitude(s: &str) -> Result<(u64, &str), ParseError> {
    let pos = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ParseError::InvalidFormat(s.to_string()))?;

    let (num_str, unit) = s.split_at(pos);
    if num_str.is_empty() {
        return Err(ParseError::InvalidFormat(s.to_string()));
    }

    let num: u64 = num_str
        .parse()
        .map_err(|_| ParseError::Overflow(num_str.to_string()))?;
    if num == 0 {
        return Err(ParseError::NonPositive);
    }

    Ok((num, unit))
}

/// Byte size parsed from `<n>B`, `<n>K`, `<n>M` or `<n>G` (binary multiples)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[
            ("B", 1),
            ("K", 1024),
            ("M", 1024 * 1024),
            ("G", 1024 * 1024 * 1024),
        ];

        for &(unit, divisor) in UNITS.iter().rev() {
            if self.0 >= divisor && self.0 % divisor == 0 {
                return format!("{}{}", self.0 / divisor, unit);
            }
        }

        format!("{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num, unit) = split_magnitude(s)?;

        let multiplier: u64 = match unit {
            "B" => 1,
            "K" => 1024,
            "M" => 1024 * 1024,
            "G" => 1024 * 1024 * 1024,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        num.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

/// Unit of a rotation interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
}

impl IntervalUnit {
    fn secs(self) -> u64 {
        match self {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => SECS_PER_MINUTE,
            IntervalUnit::Hours => SECS_PER_HOUR,
            IntervalUnit::Days => SECS_PER_DAY,
            IntervalUnit::Months => SECS_PER_MONTH,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            IntervalUnit::Seconds => "s",
            IntervalUnit::Minutes => "m",
            IntervalUnit::Hours => "h",
            IntervalUnit::Days => "d",
            IntervalUnit::Months => "M",
        }
    }
}

/// Rotation interval parsed from `<n>s`, `<n>m`, `<n>h`, `<n>d` or `<n>M`
///
/// `m` is minutes and `M` is calendar months; `month` is accepted as a long
/// form of `M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    magnitude: u64,
    unit: IntervalUnit,
}

impl Interval {
    pub fn new(magnitude: u64, unit: IntervalUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn magnitude(&self) -> u64 {
        self.magnitude
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.magnitude.saturating_mul(self.unit.secs()))
    }

    pub fn as_millis(&self) -> u128 {
        self.as_duration().as_millis()
    }
}

impl FromStr for Interval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (magnitude, unit) = split_magnitude(s)?;

        let unit = match unit {
            "s" => IntervalUnit::Seconds,
            "m" => IntervalUnit::Minutes,
            "h" => IntervalUnit::Hours,
            "d" => IntervalUnit::Days,
            "M" | "month" => IntervalUnit::Months,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        magnitude
            .checked_mul(unit.secs())
            .ok_or_else(|| ParseError::Overflow(s.to_string()))?;

        Ok(Interval { magnitude, unit })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.suffix())
    }
}
