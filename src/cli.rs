//! Command-line interface

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::ConfigManager;
use crate::logging::{LogConfig, LogDestination, LogFormat};

/// LAN device port-scan orchestrator
#[derive(Parser, Debug)]
#[command(name = "portwatch")]
#[command(about = "Tracks LAN devices and keeps a durable, deduplicated history of nmap port scans against them")]
#[command(version)]
pub struct Args {
    /// Verbose output (debug level logging)
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (error level logging only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug output (trace level logging)
    #[arg(long)]
    pub debug: bool,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Log file path for file output
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log level for file output (independent of console level)
    #[arg(long, value_name = "LEVEL")]
    pub log_file_level: Option<String>,

    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Database file path (overrides configuration)
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a device, or update its address/name/online flag
    Add {
        /// Device hardware address (MAC)
        mac: String,
        /// Device network address (IP)
        ip: String,
        /// Human-readable device name
        #[arg(long)]
        name: Option<String>,
        /// Register the device as offline
        #[arg(long)]
        offline: bool,
    },

    /// List registered devices
    Devices,

    /// Mark a device online or offline
    Online {
        mac: String,
        /// Mark offline instead of online
        #[arg(long)]
        offline: bool,
    },

    /// Admit and run one scan for a device, waiting for the result
    Scan {
        mac: String,
        /// Use the one-time first-scan path for a new device
        #[arg(long)]
        first_time: bool,
    },

    /// Show a device's scan history
    History {
        mac: String,
        /// Maximum number of records to show
        #[arg(short, long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Show the port results of a device's most recent completed scan
    Results {
        mac: String,
        /// Show a specific record instead of the latest completed one
        #[arg(long, value_name = "ID")]
        record: Option<i64>,
    },

    /// Run continuously, rescanning online devices on an interval
    Watch,
}

/// Parse command line arguments.
pub fn parse_args() -> Args {
    Args::parse()
}

/// Validate flag combinations that clap cannot express.
pub fn validate_args(args: &Args) -> Result<()> {
    if args.verbose && args.quiet {
        return Err(anyhow::anyhow!("--verbose and --quiet are mutually exclusive"));
    }
    if args.log_file_level.is_some() && args.log_file.is_none() {
        return Err(anyhow::anyhow!("--log-file-level requires --log-file"));
    }
    Ok(())
}

/// Assemble the logging configuration. CLI flags win over the config file.
pub fn configure_logging(args: &Args, config: &ConfigManager) -> Result<LogConfig> {
    let console_level = if args.debug {
        log::LevelFilter::Trace
    } else if args.verbose {
        log::LevelFilter::Debug
    } else if args.quiet {
        log::LevelFilter::Error
    } else {
        config
            .get_log_level("base", "log-level")?
            .unwrap_or(log::LevelFilter::Info)
    };

    let format = match args.log_format.as_deref() {
        Some(value) => value.parse::<LogFormat>().map_err(anyhow::Error::msg)?,
        None => match config.get_value("base", "log-format") {
            Some(value) => value.parse::<LogFormat>().map_err(anyhow::Error::msg)?,
            None => LogFormat::Text,
        },
    };

    let log_file = args
        .log_file
        .clone()
        .or_else(|| config.get_path("base", "log-file"));
    let file_level = match &args.log_file_level {
        Some(level) => Some(crate::logging::parse_log_level(level)?),
        None => config.get_log_level("base", "log-file-level")?,
    };

    let (destination, file_level) = match log_file {
        Some(path) => (
            LogDestination::Both(path),
            Some(file_level.unwrap_or(log::LevelFilter::Debug)),
        ),
        None => (LogDestination::Console, None),
    };

    Ok(LogConfig {
        console_level,
        file_level,
        format,
        destination,
    })
}
