//! Command-line interface for backupg.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from their
/// string names ("info", "debug", etc.).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for backupg.
#[derive(Parser)]
#[command(name = "backupg", version, author)]
#[command(about = "A backup daemon for mountable network-filesystem volumes", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for backupg.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the backup daemon with the given configuration.
    Start {
        /// Path to the configuration file (defaults to `backupg.yaml`).
        #[arg(short, long, default_value = "backupg.yaml")]
        config: String,

        /// Whether to detach into the background.
        #[arg(long)]
        daemonize: bool,

        /// Run a single pass over the targets and exit.
        #[arg(long)]
        once: bool,

        /// Override the PID file guarding against duplicate instances.
        #[arg(long, value_name = "PATH")]
        pid_file: Option<String>,
    },

    /// Stop the currently running backup daemon.
    Stop {
        /// Override the PID file naming the running instance.
        #[arg(long, value_name = "PATH")]
        pid_file: Option<String>,
    },

    /// Show the tail of the backup journal.
    Logs {
        /// Path to the configuration file (defaults to `backupg.yaml`).
        #[arg(short, long, default_value = "backupg.yaml")]
        config: String,

        /// Number of lines to show (default: 50).
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
