//! Retention policy for rotated and compressed log files
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::diagnostics::ErrorLogger;
use crate::observability::TransportMetrics;

/// How often the sweep repeats after the startup run
pub const SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Sweep statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    /// Matching files that vanished between listing and deletion
    pub vanished: usize,
    pub failed: usize,
}

/// Reports the file the rotation engine is writing right now
pub type LivePath = Arc<dyn Fn() -> Option<PathBuf> + Send + Sync>;

/// Whether `name` belongs to the transport writing `base_name`
pub fn is_managed_file(name: &str, base_name: &str) -> bool {
    name.starts_with(base_name) && (name.ends_with(".log") || name.ends_with(".log.gz"))
}

/// Whether `name` is a file the engine may still be appending to
fn is_live_file(name: &str, base_name: &str, live: Option<&Path>) -> bool {
    name.strip_suffix(".log") == Some(base_name)
        || live.and_then(Path::file_name).is_some_and(|live| live == name)
}

/// Delete managed files in `dir` last modified before `now - retention_days`.
///
/// `<base>.log` and `live` are never touched: they are open for writing.
/// Listing and per-file failures are reported to `logger` and never abort the
/// sweep of the remaining files.
pub fn sweep(
    dir: &Path,
    base_name: &str,
    retention_days: u32,
    now: SystemTime,
    live: Option<&Path>,
    logger: &ErrorLogger,
) -> SweepStats {
    let mut stats = SweepStats::default();
    if retention_days == 0 {
        return stats;
    }

    let retention = Duration::from_secs(u64::from(retention_days) * SECS_PER_DAY);
    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            logger.log(&format!("Failed to list log directory {}", dir.display()), Some(&e));
            return stats;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                stats.failed += 1;
                logger.log(&format!("Failed to read entry in {}", dir.display()), Some(&e));
                continue;
            }
        };

        let path = entry.path();
        match entry.file_name().to_str() {
            Some(name) if is_managed_file(name, base_name) => {
                if is_live_file(name, base_name, live) {
                    debug!(path = %path.display(), "Skipping live log file");
                    continue;
                }
            }
            _ => continue,
        }
        stats.scanned += 1;

        match expire(&path, cutoff) {
            Ok(true) => {
                stats.deleted += 1;
                logger.log(&format!("Deleted expired log file {}", path.display()), None);
            }
            Ok(false) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                stats.vanished += 1;
                debug!(path = %path.display(), "Log file vanished during sweep");
            }
            Err(e) => {
                stats.failed += 1;
                logger.log(&format!("Failed to expire log file {}", path.display()), Some(&e));
            }
        }
    }

    stats
}

/// Remove `path` if it was last modified before `cutoff`
fn expire(path: &Path, cutoff: SystemTime) -> io::Result<bool> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() || metadata.modified()? >= cutoff {
        return Ok(false);
    }
    fs::remove_file(path)?;
    Ok(true)
}

/// Startup plus daily retention sweep
pub struct RetentionSweeper {
    handle: JoinHandle<()>,
}

impl RetentionSweeper {
    /// Run an initial sweep, then one every [`SWEEP_PERIOD`].
    ///
    /// Returns `None` without touching the filesystem when `retention_days`
    /// is 0.
    pub fn start(
        dir: PathBuf,
        base_name: String,
        retention_days: u32,
        live: LivePath,
        logger: Arc<ErrorLogger>,
        metrics: Arc<TransportMetrics>,
    ) -> Option<Self> {
        Self::start_with_period(dir, base_name, retention_days, live, logger, metrics, SWEEP_PERIOD)
    }

    pub fn start_with_period(
        dir: PathBuf,
        base_name: String,
        retention_days: u32,
        live: LivePath,
        logger: Arc<ErrorLogger>,
        metrics: Arc<TransportMetrics>,
        period: Duration,
    ) -> Option<Self> {
        if retention_days == 0 {
            return None;
        }

        info!(dir = %dir.display(), retention_days, "Starting retention sweeper");
        let handle = tokio::spawn(async move {
            // First tick is immediate: the startup sweep
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;

                let (sweep_dir, sweep_base) = (dir.clone(), base_name.clone());
                let sweep_logger = Arc::clone(&logger);
                let live_path = live();
                let swept = tokio::task::spawn_blocking(move || {
                    sweep(
                        &sweep_dir,
                        &sweep_base,
                        retention_days,
                        SystemTime::now(),
                        live_path.as_deref(),
                        &sweep_logger,
                    )
                })
                .await;

                match swept {
                    Ok(stats) => {
                        metrics.retention_deleted(stats.deleted as u64);
                        info!("Retention sweep complete: {:?}", stats);
                    }
                    Err(e) => logger.log("Retention sweep task failed", Some(&e)),
                }
            }
        });

        Some(Self { handle })
    }

    /// Cancel the timer
    pub fn stop(self) {
        self.handle.abort();
    }
}
