//! Transport pipeline
//!
//! Wires the pieces together for one log destination:
//!
//! ```text
//! write(line) -> formatter -> rotation engine -> dir/base.log
//!                                   |
//!                                   | RotationEvent
//!                                   v
//!                          compression worker -> *.log.gz
//! ```
//!
//! A retention sweeper runs next to the pipeline and the error logger
//! collects everything that goes wrong along the way. Only configuration
//! errors and a failed engine shutdown ever reach the caller.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::compression::{
    spawn_eviction, CompressionContext, CompressionLedger, CompressionWorker, EVICTION_PERIOD,
    LEDGER_TTL,
};
use crate::config::{TransportConfig, TransportSettings, ValidationError};
use crate::diagnostics::ErrorLogger;
use crate::format::{formatter_for, LineFormatter};
use crate::naming::NamingStrategy;
use crate::observability::{MetricsSnapshot, TransportMetrics};
use crate::retention::{LivePath, RetentionSweeper};
use crate::rotation::{EventSender, FileRotator, RotationEngine, RotationOptions};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Failed to open log destination {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to close rotation engine: {0}")]
    End(#[source] io::Error),

    #[error("Failed to forward log line: {0}")]
    Forward(#[source] io::Error),

    #[error("Transport is closed")]
    Closed,
}

/// Writer a disabled transport forwards lines to
pub type ForwardSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A log sink: either a pass-through or the full rotate/compress/retain
/// pipeline
pub struct Transport {
    inner: Inner,
}

enum Inner {
    Disabled(DisabledSink),
    Active(Box<ActivePipeline>),
}

struct DisabledSink {
    sink: tokio::sync::Mutex<ForwardSink>,
    closed: AtomicBool,
}

struct ActivePipeline {
    formatter: Box<dyn LineFormatter>,
    engine: Arc<dyn RotationEngine>,
    logger: Arc<ErrorLogger>,
    metrics: Arc<TransportMetrics>,
    background: Mutex<Background>,
    closed: AtomicBool,
}

#[derive(Default)]
struct Background {
    worker: Option<CompressionWorker>,
    eviction: Option<JoinHandle<()>>,
    sweeper: Option<RetentionSweeper>,
}

impl Transport {
    /// Validate raw settings, then open
    pub async fn from_settings(settings: &TransportSettings) -> Result<Self, TransportError> {
        let config = settings.validate()?;
        Self::open(config).await
    }

    /// Open the pipeline on the default [`FileRotator`] engine, or a stdout
    /// pass-through when the config disables the transport
    pub async fn open(config: TransportConfig) -> Result<Self, TransportError> {
        Self::open_with_engine(config, |options, events, metrics| async move {
            FileRotator::open(options, events, metrics).await
        })
        .await
    }

    /// Open the pipeline on an engine built by `open_engine`.
    ///
    /// The factory gets the rotation options, the event sender when
    /// compression is on, and the shared metrics.
    pub async fn open_with_engine<E, F, Fut>(
        config: TransportConfig,
        open_engine: F,
    ) -> Result<Self, TransportError>
    where
        E: RotationEngine + 'static,
        F: FnOnce(RotationOptions, Option<EventSender>, Arc<TransportMetrics>) -> Fut,
        Fut: Future<Output = io::Result<E>>,
    {
        if !config.enabled {
            info!("Transport disabled, forwarding lines to stdout");
            return Ok(Self::disabled(Box::new(tokio::io::stdout())));
        }

        if config.compress && config.compression.strategy != 0 {
            warn!(
                strategy = config.compression.strategy,
                "compression.strategy is not supported by the gzip encoder and is ignored"
            );
        }

        let metrics = Arc::new(TransportMetrics::new());
        let logger = ErrorLogger::open(config.error_log_file.clone().into(), config.error_flush_interval);

        let (events, receiver) = if config.compress {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let options = RotationOptions {
            size_threshold_bytes: config.size.as_u64(),
            interval: config.interval.as_duration(),
            immutable: config.immutable,
            naming: NamingStrategy::new(&config.dir, &config.filename, config.timestamp_format),
        };

        let engine = match open_engine(options, events, Arc::clone(&metrics)).await {
            Ok(engine) => engine,
            Err(e) => {
                logger.log(&format!("Failed to open log destination {}", config.dir.display()), Some(&e));
                logger.destroy();
                return Err(TransportError::Open {
                    path: config.dir,
                    source: e,
                });
            }
        };

        let engine: Arc<dyn RotationEngine> = Arc::new(engine);
        let live: LivePath = {
            let engine = Arc::clone(&engine);
            Arc::new(move || engine.live_path())
        };
        let mut background = Background::default();

        if let Some(receiver) = receiver {
            let ledger = Arc::new(CompressionLedger::new());
            background.eviction = Some(spawn_eviction(Arc::clone(&ledger), EVICTION_PERIOD, LEDGER_TTL));
            background.worker = Some(CompressionWorker::spawn(
                receiver,
                CompressionContext {
                    ledger,
                    logger: Arc::clone(&logger),
                    options: config.compression,
                    metrics: Arc::clone(&metrics),
                },
            ));
        }

        background.sweeper = RetentionSweeper::start(
            config.dir.clone(),
            config.filename.clone(),
            config.retention_days,
            live,
            Arc::clone(&logger),
            Arc::clone(&metrics),
        );

        info!(
            dir = %config.dir.display(),
            filename = %config.filename,
            size = %config.size,
            interval = %config.interval,
            compress = config.compress,
            retention_days = config.retention_days,
            "Transport opened"
        );

        Ok(Self {
            inner: Inner::Active(Box::new(ActivePipeline {
                formatter: formatter_for(config.skip_pretty, &config.pretty),
                engine,
                logger,
                metrics,
                background: Mutex::new(background),
                closed: AtomicBool::new(false),
            })),
        })
    }

    /// Pass-through transport: lines go to `sink` unchanged
    pub fn disabled(sink: ForwardSink) -> Self {
        Self {
            inner: Inner::Disabled(DisabledSink {
                sink: tokio::sync::Mutex::new(sink),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.inner, Inner::Active(_))
    }

    /// Counters for the active pipeline; all zero when disabled
    pub fn metrics(&self) -> MetricsSnapshot {
        match &self.inner {
            Inner::Disabled(_) => MetricsSnapshot::default(),
            Inner::Active(pipeline) => pipeline.metrics.snapshot(),
        }
    }

    /// Write one log line.
    ///
    /// On the active pipeline formatting and disk errors go to the error
    /// logger, so the only failure is writing after [`Transport::close`].
    /// A disabled transport also reports a failing forward sink.
    pub async fn write(&self, line: &[u8]) -> Result<(), TransportError> {
        match &self.inner {
            Inner::Disabled(disabled) => disabled.forward(line).await,
            Inner::Active(pipeline) => pipeline.write(line).await,
        }
    }

    /// Shut the pipeline down. Safe to call more than once.
    ///
    /// Rotations that happen while the engine ends are still compressed
    /// before this returns.
    pub async fn close(&self) -> Result<(), TransportError> {
        match &self.inner {
            Inner::Disabled(disabled) => {
                disabled.closed.store(true, Ordering::Release);
                Ok(())
            }
            Inner::Active(pipeline) => pipeline.close().await,
        }
    }
}

impl DisabledSink {
    async fn forward(&self, line: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.write_all(line).await.map_err(TransportError::Forward)?;
        sink.flush().await.map_err(TransportError::Forward)
    }
}

impl ActivePipeline {
    async fn write(&self, line: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let formatted = match self.formatter.format(line) {
            Ok(formatted) => formatted,
            Err(e) => {
                self.metrics.format_failed();
                self.logger.log("FormatFault: writing line unformatted", Some(&e));
                line.to_vec()
            }
        };

        match self.engine.write(&formatted).await {
            Ok(()) => self.metrics.line_written(),
            Err(e) => {
                self.metrics.write_failed();
                self.logger.log("Failed to write log line", Some(&e));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let background = std::mem::take(&mut *self.background.lock().unwrap_or_else(PoisonError::into_inner));

        if let Some(sweeper) = background.sweeper {
            sweeper.stop();
        }

        let ended = self.engine.end().await;
        if let Err(e) = &ended {
            self.logger.log("Failed to close rotation engine", Some(e));
        }

        if let Some(worker) = background.worker {
            worker.shutdown().await;
        }
        if let Some(eviction) = background.eviction {
            eviction.abort();
        }

        debug!(metrics = ?self.metrics.snapshot(), "Transport closed");
        self.logger.destroy();

        ended.map_err(TransportError::End)
    }
}

impl Drop for ActivePipeline {
    fn drop(&mut self) {
        let background = self.background.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(sweeper) = background.sweeper.take() {
            sweeper.stop();
        }
        if let Some(eviction) = background.eviction.take() {
            eviction.abort();
        }
    }
}
