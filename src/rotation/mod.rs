//! Rotation engine seam
//!
//! The transport drives an engine through [`RotationEngine`] and learns about
//! closed files through [`RotationEvent`]s sent on an unbounded channel. The
//! engine owns boundary detection and the live write stream; what happens to
//! a file after it is closed is the transport's business.
//!
//! [`FileRotator`] is the engine used by default.

mod file;

pub use file::FileRotator;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::naming::NamingStrategy;

/// A file the engine has just closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    pub path: PathBuf,
}

/// Sending half handed to engines when something subscribes to rotations
pub type EventSender = mpsc::UnboundedSender<RotationEvent>;

/// Settings an engine is opened with
#[derive(Debug, Clone)]
pub struct RotationOptions {
    pub size_threshold_bytes: u64,
    pub interval: Duration,
    /// Write each file under its final name; never rename
    pub immutable: bool,
    pub naming: NamingStrategy,
}

#[async_trait]
pub trait RotationEngine: Send + Sync {
    /// Append bytes to the live file, rotating first when a threshold is hit
    async fn write(&self, buf: &[u8]) -> io::Result<()>;

    /// Flush and close the live file. Writes after this fail.
    async fn end(&self) -> io::Result<()>;

    /// File currently open for writing, which retention must leave alone
    fn live_path(&self) -> Option<PathBuf> {
        None
    }
}
