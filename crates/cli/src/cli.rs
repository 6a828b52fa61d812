//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// BLE Acquire - sample a Bluetooth Low Energy sensor into data buffers
#[derive(Parser, Debug)]
#[command(
    name = "ble-acquire",
    author,
    version,
    about = "BLE sensor acquisition pipeline",
    long_about = "Connects to a Bluetooth Low Energy peripheral described by a configuration file,\n\
                  polls or subscribes to its characteristics, converts the payloads and appends\n\
                  the values to per-channel buffers with a shared session time origin."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "BLE_ACQUIRE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "BLE_ACQUIRE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an acquisition session
    Run(RunArgs),

    /// Validate configuration file without connecting
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
        default_value = "acquisition.toml",
        env = "BLE_ACQUIRE_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the device address from configuration
    #[arg(long, env = "BLE_ACQUIRE_ADDRESS")]
    pub address: Option<String>,

    /// Override the advertised device name from configuration
    #[arg(long, env = "BLE_ACQUIRE_NAME")]
    pub name: Option<String>,

    /// Acquisition duration in seconds (0 = until interrupted)
    #[arg(long, default_value = "0", env = "BLE_ACQUIRE_DURATION")]
    pub duration: u64,

    /// Stop after this many appended sample rows (0 = unlimited)
    #[arg(long, default_value = "0", env = "BLE_ACQUIRE_MAX_SAMPLES")]
    pub max_samples: u64,

    /// Seconds between buffer reports
    #[arg(long, default_value = "1", env = "BLE_ACQUIRE_REPORT_INTERVAL")]
    pub report_interval: u64,

    /// Reconnect attempts after the link drops (0 = end the session)
    #[arg(long, default_value = "3", env = "BLE_ACQUIRE_RECONNECT")]
    pub reconnect_attempts: u32,

    /// Use the simulated peripheral instead of the Bluetooth adapter
    #[arg(long, env = "BLE_ACQUIRE_MOCK")]
    pub mock: bool,

    /// Push interval of the simulated peripheral in milliseconds
    #[arg(long, default_value = "100", env = "BLE_ACQUIRE_MOCK_INTERVAL_MS")]
    pub mock_interval_ms: u64,

    /// Validate configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "BLE_ACQUIRE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "acquisition.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "acquisition.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show channel bindings of every characteristic
    #[arg(long)]
    pub channels: bool,

    /// Show buffer configuration
    #[arg(long)]
    pub buffers: bool,
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
