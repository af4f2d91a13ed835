//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stream Sub - subscriber for publish/subscribe streaming tables
#[derive(Parser, Debug)]
#[command(
    name = "stream-sub",
    author,
    version,
    about = "Streaming table subscriber",
    long_about = "Subscribes to remote append-only stream tables.\n\n\
                  Validates and inspects subscription configs, and runs a simulated \n\
                  session against an in-process mock cluster."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "STREAM_SUB_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "STREAM_SUB_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default level when RUST_LOG is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured subscriptions against a simulated cluster
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "subscriptions.toml",
        env = "STREAM_SUB_CONFIG"
    )]
    pub config: PathBuf,

    /// Override client thread count (1 = single-threaded runtime)
    #[arg(long, env = "STREAM_SUB_THREADS")]
    pub threads: Option<usize>,

    /// Session duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10", env = "STREAM_SUB_DURATION")]
    pub duration: u64,

    /// Rows published per second into each simulated table
    #[arg(long, default_value = "20", env = "STREAM_SUB_PUBLISH_RATE")]
    pub publish_rate: u32,

    /// Force-drop connections to primary sites every N seconds (0 = never)
    #[arg(long, default_value = "0")]
    pub drop_every: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "STREAM_SUB_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "subscriptions.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "subscriptions.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show deserializer tag mappings
    #[arg(long)]
    pub deserializers: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
