//! Buffered side channel for operational errors
//!
//! Every component reports non-fatal problems here instead of returning them
//! to the log producer. Lines are buffered in memory and flushed either when
//! the buffer fills up or on a fixed interval, whichever comes first.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Number of buffered lines that forces an immediate flush
pub const BUFFER_CAPACITY: usize = 100;

/// Where flushed diagnostics end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSink {
    /// Append to a file, created on first flush
    File(PathBuf),
    /// Write to the process's stderr
    Stderr,
}

impl From<Option<PathBuf>> for ErrorSink {
    fn from(path: Option<PathBuf>) -> Self {
        path.map(ErrorSink::File).unwrap_or(ErrorSink::Stderr)
    }
}

/// Interval-flushed error buffer shared by the whole transport
pub struct ErrorLogger {
    buffer: Mutex<Vec<String>>,
    sink: ErrorSink,
    timer: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ErrorLogger {
    /// Create a logger and start its flush timer on the current tokio runtime
    pub fn open(sink: ErrorSink, flush_interval: Duration) -> Arc<Self> {
        let logger = Self::detached(sink);
        let handle = tokio::spawn(flush_loop(Arc::downgrade(&logger), flush_interval));
        *logger.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        logger
    }

    /// Create a logger without a flush timer; it flushes on capacity,
    /// explicit [`ErrorLogger::flush`] and [`ErrorLogger::destroy`] only.
    pub fn detached(sink: ErrorSink) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Vec::with_capacity(BUFFER_CAPACITY)),
            sink,
            timer: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    /// Record a diagnostic line. Never fails.
    pub fn log(&self, message: &str, cause: Option<&dyn fmt::Display>) {
        let line = format_line(message, cause);
        debug!(target: "logsink::diagnostics", "{}", line.trim_end());

        let full = {
            let mut buffer = self.lock_buffer();
            buffer.push(line);
            buffer.len() >= BUFFER_CAPACITY
        };

        if full || self.destroyed.load(Ordering::Acquire) {
            self.flush();
        }
    }

    /// Number of lines waiting for the next flush
    pub fn pending(&self) -> usize {
        self.lock_buffer().len()
    }

    /// Drain the buffer and write it out in one piece
    pub fn flush(&self) {
        let drained = std::mem::take(&mut *self.lock_buffer());
        if drained.is_empty() {
            return;
        }

        let payload = drained.concat();
        if let Err(e) = self.write_out(payload.as_bytes()) {
            // Nowhere left to report this
            debug!(error = %e, sink = ?self.sink, "Failed to write diagnostics");
        }
    }

    /// Stop the timer and flush whatever is left. Safe to call more than once.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        if let Some(handle) = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.flush();
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_out(&self, payload: &[u8]) -> io::Result<()> {
        match &self.sink {
            ErrorSink::File(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(payload)?;
                file.flush()
            }
            ErrorSink::Stderr => {
                let mut stderr = io::stderr().lock();
                stderr.write_all(payload)?;
                stderr.flush()
            }
        }
    }
}

impl Drop for ErrorLogger {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for ErrorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLogger")
            .field("sink", &self.sink)
            .field("pending", &self.pending())
            .finish()
    }
}

fn format_line(message: &str, cause: Option<&dyn fmt::Display>) -> String {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    match cause {
        Some(cause) => format!("{} - {}: {}\n", now, message, cause),
        None => format!("{} - {}\n", now, message),
    }
}

async fn flush_loop(logger: Weak<ErrorLogger>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match logger.upgrade() {
            Some(logger) => logger.flush(),
            None => break,
        }
    }
}
