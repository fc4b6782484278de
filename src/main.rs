mod cli;

use clap::Parser;
use cli::{Cli, Commands, SinkArgs};
use logsink::config::{self, TransportSettings};
use logsink::observability::init_tracing;
use logsink::{Transport, TransportError};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(load_settings(&args)?).await?,
        Commands::Check(args) => check(load_settings(&args)?)?,
    }

    Ok(())
}

fn load_settings(args: &SinkArgs) -> Result<TransportSettings, config::ConfigError> {
    let path = args.config.clone().unwrap_or_else(config::default_path);
    let mut settings = TransportSettings::load_from_path(path)?;
    args.apply(&mut settings);
    Ok(settings)
}

async fn run(settings: TransportSettings) -> Result<(), AnyError> {
    let transport = Transport::from_settings(&settings).await?;
    let stdin = BufReader::new(tokio::io::stdin());

    pump(&transport, stdin, shutdown_signal()).await?;
    info!(metrics = ?transport.metrics(), "Transport closed");
    Ok(())
}

/// Copy lines from `input` into `transport` until EOF or `shutdown`, then
/// close the transport whether or not a write failed
async fn pump<R, S>(transport: &Transport, input: R, shutdown: S) -> Result<(), TransportError>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    let mut written = Ok(());
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(mut line)) => {
                    line.push('\n');
                    if let Err(e) = transport.write(line.as_bytes()).await {
                        written = Err(e);
                        break;
                    }
                }
                Ok(None) => {
                    info!("End of input");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    let closed = transport.close().await;
    written?;
    closed
}

fn check(settings: TransportSettings) -> Result<(), AnyError> {
    let config = settings.validate()?;
    info!(
        dir = %config.dir.display(),
        size_bytes = config.size.as_u64(),
        interval_ms = config.interval.as_millis(),
        "Configuration is valid"
    );
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
