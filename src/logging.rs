//! Logging setup
//!
//! Structured logging on top of the `log` facade: text or JSON lines, to the
//! console, a file, or both, with independent level filters per destination.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use log::{Level, LevelFilter};
use serde::Serialize;

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {}. Valid options: text, json", s)),
        }
    }
}

/// Log destination options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
    Both(PathBuf),
}

/// One JSON-formatted log line
#[derive(Debug, Serialize)]
struct JsonLogEntry<'a> {
    timestamp: String,
    level: String,
    message: &'a str,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console_level: LevelFilter,
    pub file_level: Option<LevelFilter>,
    pub format: LogFormat,
    pub destination: LogDestination,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_level: LevelFilter::Info,
            file_level: None,
            format: LogFormat::Text,
            destination: LogDestination::Console,
        }
    }
}

struct PortwatchLogger {
    config: LogConfig,
}

impl PortwatchLogger {
    fn format_message(&self, level: Level, message: &str) -> String {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        match self.config.format {
            LogFormat::Text => {
                format!("{} [{}] {}", timestamp, level.to_string().to_uppercase(), message)
            }
            LogFormat::Json => {
                let entry = JsonLogEntry {
                    timestamp,
                    level: level.to_string().to_uppercase(),
                    message,
                };
                serde_json::to_string(&entry)
                    .unwrap_or_else(|_| format!("{{\"message\":{:?}}}", message))
            }
        }
    }

    fn console_enabled(&self, level: Level) -> bool {
        level <= self.config.console_level
    }

    fn file_enabled(&self, level: Level) -> bool {
        self.config.file_level.is_some_and(|filter| level <= filter)
    }

    fn write_to_file(&self, path: &PathBuf, line: &str) {
        let opened = OpenOptions::new().create(true).append(true).open(path);
        match opened {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", line) {
                    eprintln!("log file write error: {}", err);
                }
            }
            Err(err) => eprintln!("cannot open log file {}: {}", path.display(), err),
        }
    }
}

impl log::Log for PortwatchLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.console_enabled(metadata.level()) || self.file_enabled(metadata.level())
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level();
        let line = self.format_message(level, &record.args().to_string());

        let file_path = match &self.config.destination {
            LogDestination::Console => None,
            LogDestination::File(path) => Some(path),
            LogDestination::Both(path) => Some(path),
        };
        let to_console = !matches!(self.config.destination, LogDestination::File(_));

        if to_console && self.console_enabled(level) {
            eprintln!("{}", line);
        }
        if let Some(path) = file_path {
            if self.file_enabled(level) {
                self.write_to_file(path, &line);
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Install the global logger.
pub fn init_logger(config: LogConfig) -> Result<()> {
    let max_level = config
        .file_level
        .map_or(config.console_level, |file| file.max(config.console_level));
    log::set_boxed_logger(Box::new(PortwatchLogger { config }))
        .context("failed to set global logger")?;
    log::set_max_level(max_level);
    Ok(())
}

/// Convert a config/CLI string to a level filter.
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        "off" => Ok(LevelFilter::Off),
        _ => Err(anyhow::anyhow!(
            "invalid log level: {}. Valid levels: error, warn, info, debug, trace, off",
            level_str
        )),
    }
}
