//! Gzip rotated files off the write path

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

use super::ledger::CompressionLedger;
use crate::config::CompressionOptions;
use crate::diagnostics::ErrorLogger;
use crate::observability::TransportMetrics;
use crate::rotation::RotationEvent;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Compressed file {0} missing after write")]
    MissingOutput(PathBuf),

    #[error("Failed to remove {path} after compression: {source}")]
    RemoveSource { path: PathBuf, source: io::Error },

    #[error("Compression task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, CompressionError>;

/// What happened to a rotated file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressOutcome {
    Compressed { destination: PathBuf, bytes_in: u64 },
    SourceMissing,
    SourceIsDirectory,
    /// Another notification for the same path got there first
    Duplicate,
}

/// `source` with `.gz` appended to the full file name
pub fn gz_path(source: &Path) -> PathBuf {
    let mut raw: OsString = source.as_os_str().to_owned();
    raw.push(".gz");
    PathBuf::from(raw)
}

/// Stream `source` into `source.gz` and remove `source` once the archive is
/// verified on disk. Blocking; call from a blocking-capable context.
pub fn compress_file(source: &Path, options: &CompressionOptions) -> Result<CompressOutcome> {
    let metadata = match fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CompressOutcome::SourceMissing),
        Err(e) => {
            return Err(CompressionError::Read {
                path: source.to_path_buf(),
                source: e,
            })
        }
    };
    if metadata.is_dir() {
        return Ok(CompressOutcome::SourceIsDirectory);
    }

    let destination = gz_path(source);
    let bytes_in = match write_archive(source, &destination, options) {
        Ok(bytes_in) => bytes_in,
        Err(e) => {
            // Best effort: never leave a truncated archive next to the source
            let _ = fs::remove_file(&destination);
            return Err(e);
        }
    };

    if !destination.exists() {
        return Err(CompressionError::MissingOutput(destination));
    }

    match fs::remove_file(source) {
        Ok(()) => {}
        // Retention got to it first; the archive is what matters
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(CompressionError::RemoveSource {
                path: source.to_path_buf(),
                source: e,
            })
        }
    }

    Ok(CompressOutcome::Compressed {
        destination,
        bytes_in,
    })
}

fn write_archive(source: &Path, destination: &Path, options: &CompressionOptions) -> Result<u64> {
    let read_err = |e: io::Error| CompressionError::Read {
        path: source.to_path_buf(),
        source: e,
    };
    let write_err = |e: io::Error| CompressionError::Write {
        path: destination.to_path_buf(),
        source: e,
    };

    let mut reader = BufReader::new(File::open(source).map_err(read_err)?);
    let writer = BufWriter::new(File::create(destination).map_err(write_err)?);

    let mut encoder = GzEncoder::new(writer, Compression::new(options.level));
    let bytes_in = io::copy(&mut reader, &mut encoder).map_err(|e| CompressionError::Write {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let mut writer = encoder.finish().map_err(write_err)?;
    writer.flush().map_err(write_err)?;
    writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?
        .sync_all()
        .map_err(write_err)?;

    Ok(bytes_in)
}

/// Shared state every compression task needs
#[derive(Clone)]
pub struct CompressionContext {
    pub ledger: Arc<CompressionLedger>,
    pub logger: Arc<ErrorLogger>,
    pub options: CompressionOptions,
    pub metrics: Arc<TransportMetrics>,
}

/// Run the dedup check and compression for one rotated file.
///
/// Failures are reported through the error logger and returned.
pub async fn compress_rotated(ctx: &CompressionContext, path: PathBuf) -> Result<CompressOutcome> {
    if !ctx.ledger.try_begin(&path) {
        debug!(path = %path.display(), "Duplicate rotation notification, skipping");
        return Ok(CompressOutcome::Duplicate);
    }

    let options = ctx.options;
    let source = path.clone();
    let result = tokio::task::spawn_blocking(move || compress_file(&source, &options))
        .await
        .unwrap_or_else(|e| Err(CompressionError::Task(e.to_string())));

    match result {
        Ok(CompressOutcome::Compressed {
            destination,
            bytes_in,
        }) => {
            ctx.ledger.complete(&path);
            ctx.metrics.compressed();
            info!(
                source = %path.display(),
                destination = %destination.display(),
                bytes_in,
                "Compressed rotated file"
            );
            Ok(CompressOutcome::Compressed {
                destination,
                bytes_in,
            })
        }
        Ok(CompressOutcome::SourceMissing) => {
            ctx.ledger.abandon(&path);
            ctx.logger.log(
                &format!("Rotated file {} does not exist, skipping compression", path.display()),
                None,
            );
            Ok(CompressOutcome::SourceMissing)
        }
        Ok(CompressOutcome::SourceIsDirectory) => {
            ctx.ledger.abandon(&path);
            ctx.logger.log(
                &format!("Rotated path {} is a directory, skipping compression", path.display()),
                None,
            );
            Ok(CompressOutcome::SourceIsDirectory)
        }
        Ok(CompressOutcome::Duplicate) => Ok(CompressOutcome::Duplicate),
        Err(e) => {
            ctx.ledger.abandon(&path);
            ctx.metrics.compression_failed();
            ctx.logger
                .log(&format!("Failed to compress {}", path.display()), Some(&e));
            Err(e)
        }
    }
}

/// Rotation-event handler: compression failures stop here
async fn handle_rotation(ctx: CompressionContext, event: RotationEvent) {
    if let Err(e) = compress_rotated(&ctx, event.path).await {
        debug!(error = %e, "Compression failure reported to diagnostics");
    }
}

/// Consumes rotation events and compresses each closed file in its own task
pub struct CompressionWorker {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl CompressionWorker {
    pub fn spawn(events: mpsc::UnboundedReceiver<RotationEvent>, ctx: CompressionContext) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        Self {
            handle: tokio::spawn(run(events, shutdown_rx, ctx)),
            shutdown,
        }
    }

    /// Stop accepting events, then wait for queued and in-flight
    /// compressions to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Compression worker ended abnormally");
        }
    }
}

async fn run(
    mut events: mpsc::UnboundedReceiver<RotationEvent>,
    mut shutdown: oneshot::Receiver<()>,
    ctx: CompressionContext,
) {
    let mut tasks = JoinSet::new();
    let mut closing = false;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !closing => {
                // Late sends fail from here on; anything already queued drains
                events.close();
                closing = true;
            }
            event = events.recv() => match event {
                Some(event) => {
                    debug!(path = %event.path.display(), "Received rotation event");
                    tasks.spawn(handle_rotation(ctx.clone(), event));
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    ctx.logger.log("Compression task aborted", Some(&e));
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            ctx.logger.log("Compression task aborted", Some(&e));
        }
    }
    debug!("Compression worker drained");
}
