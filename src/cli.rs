use clap::{Parser, Subcommand};
use std::path::PathBuf;

use logsink::TransportSettings;

#[derive(Parser, Debug)]
#[command(name = "logsink")]
#[command(about = "Rotating, compressing log file sink", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read log lines from stdin and write them through the transport
    Run(SinkArgs),
    /// Validate the configuration and print the effective settings
    Check(SinkArgs),
}

/// Overrides applied on top of the file and environment configuration
#[derive(clap::Args, Debug)]
pub struct SinkArgs {
    /// Configuration file (default: $LOGSINK_CONFIG or config/logsink.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory log files are written to
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Base name of the log files
    #[arg(long)]
    pub filename: Option<String>,

    /// Size threshold, e.g. 10M
    #[arg(long)]
    pub size: Option<String>,

    /// Time threshold, e.g. 1d
    #[arg(long)]
    pub interval: Option<String>,

    /// Days to keep rotated files; 0 keeps them forever
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Leave rotated files uncompressed
    #[arg(long)]
    pub no_compress: bool,
}

impl SinkArgs {
    /// Apply the flags that were given to `settings`
    pub fn apply(&self, settings: &mut TransportSettings) {
        if let Some(dir) = &self.dir {
            settings.dir = Some(dir.clone());
        }
        if let Some(filename) = &self.filename {
            settings.filename = filename.clone();
        }
        if let Some(size) = &self.size {
            settings.size = size.clone();
        }
        if let Some(interval) = &self.interval {
            settings.interval = interval.clone();
        }
        if let Some(days) = self.retention_days {
            settings.retention_days = days;
        }
        if self.no_compress {
            settings.compress = false;
        }
    }
}
