//! Transport counters and tracing setup

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

/// Counters for everything the transport does off the producer's path
#[derive(Debug, Default)]
pub struct TransportMetrics {
    lines_written: AtomicU64,
    write_failures: AtomicU64,
    format_failures: AtomicU64,
    rotations: AtomicU64,
    compressions: AtomicU64,
    compression_failures: AtomicU64,
    retention_deletions: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line_written(&self) {
        self.lines_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "write_failures", "Metric incremented");
    }

    pub fn format_failed(&self) {
        self.format_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "format_failures", "Metric incremented");
    }

    pub fn rotated(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "rotations", "Metric incremented");
    }

    pub fn compressed(&self) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "compressions", "Metric incremented");
    }

    pub fn compression_failed(&self) {
        self.compression_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "compression_failures", "Metric incremented");
    }

    pub fn retention_deleted(&self, count: u64) {
        self.retention_deletions.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "retention_deletions", count, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_written: self.lines_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            format_failures: self.format_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            compressions: self.compressions.load(Ordering::Relaxed),
            compression_failures: self.compression_failures.load(Ordering::Relaxed),
            retention_deletions: self.retention_deletions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub lines_written: u64,
    pub write_failures: u64,
    pub format_failures: u64,
    pub rotations: u64,
    pub compressions: u64,
    pub compression_failures: u64,
    pub retention_deletions: u64,
}

/// Install the stderr tracing subscriber used by the binary
///
/// `RUST_LOG` wins; otherwise `logsink=info`.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logsink=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .init();
}
