//! Configuration
//!
//! TOML configuration with a discovery hierarchy and string-keyed sections.
//! Typed accessors convert the relevant sections into the scanner, queue,
//! database, and watch settings the rest of the crate consumes.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use toml::Value;

use crate::queue::{DispatcherConfig, RetryPolicy};
use crate::scanner::{ScannerSettings, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PORTWATCH_CONFIG";

/// Default seconds between periodic rescan sweeps
pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 3600;

/// Configuration storage - section name -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

/// Configuration manager
pub struct ConfigManager {
    config: Configuration,
    config_file_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a ConfigManager from an in-memory Configuration (primarily for
    /// testing).
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            config_file_path: None,
        }
    }

    /// Load configuration using the discovery hierarchy.
    pub fn load() -> Result<Self> {
        for path in discover_config_files() {
            if path.exists() {
                info!("loading configuration from {}", path.display());
                return Self::load_from_file(path);
            }
        }
        debug!("no configuration file found, using defaults");
        Ok(Self {
            config: Configuration::new(),
            config_file_path: None,
        })
    }

    /// Load configuration from an explicit file path.
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = parse_toml_config(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(Self {
            config,
            config_file_path: Some(path),
        })
    }

    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Get a value, falling back to the `base` section.
    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        self.config
            .get(section)
            .and_then(|s| s.get(key))
            .or_else(|| self.config.get("base").and_then(|s| s.get(key)))
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow::anyhow!(
                    "invalid boolean value for {}.{}: {}",
                    section,
                    key,
                    value
                )),
            },
            None => Ok(None),
        }
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>> {
        match self.get_value(section, key) {
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .with_context(|| format!("invalid integer for {}.{}: {}", section, key, value)),
            None => Ok(None),
        }
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Result<Option<f64>> {
        match self.get_value(section, key) {
            Some(value) => value
                .parse::<f64>()
                .map(Some)
                .with_context(|| format!("invalid number for {}.{}: {}", section, key, value)),
            None => Ok(None),
        }
    }

    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(PathBuf::from)
    }

    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    /// Scanner settings from the `[scanner]` section.
    pub fn scanner_settings(&self) -> Result<ScannerSettings> {
        let timeout_secs = self
            .get_u64("scanner", "timeout-secs")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let probe_timeout_secs = self
            .get_u64("scanner", "probe-timeout-secs")?
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS);
        Ok(ScannerSettings {
            tool_path: self.get_path("scanner", "nmap-path"),
            timeout: Duration::from_secs(timeout_secs),
            probe_timeout: Duration::from_secs(probe_timeout_secs),
        })
    }

    /// Dispatcher settings from the `[queue]` section.
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig> {
        let defaults = DispatcherConfig::default();
        let retry_defaults = RetryPolicy::default();
        let config = DispatcherConfig {
            workers: self
                .get_u64("queue", "workers")?
                .map(|n| n as usize)
                .unwrap_or(defaults.workers),
            retry: RetryPolicy {
                max_retries: self
                    .get_u64("queue", "max-retries")?
                    .map(|n| n as u32)
                    .unwrap_or(retry_defaults.max_retries),
                initial_delay_ms: self
                    .get_u64("queue", "retry-initial-delay-ms")?
                    .unwrap_or(retry_defaults.initial_delay_ms),
                max_delay_ms: self
                    .get_u64("queue", "retry-max-delay-ms")?
                    .unwrap_or(retry_defaults.max_delay_ms),
                multiplier: self
                    .get_f64("queue", "retry-multiplier")?
                    .unwrap_or(retry_defaults.multiplier),
            },
        };
        config
            .validate()
            .context("queue configuration validation failed")?;
        Ok(config)
    }

    /// Database location: `[database] path`, or a per-user data directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = self.get_path("database", "path") {
            return path;
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("portwatch").join("portwatch.db"))
            .unwrap_or_else(|| PathBuf::from("portwatch.db"))
    }

    /// Interval between periodic rescan sweeps, from `[watch]`.
    pub fn rescan_interval(&self) -> Result<Duration> {
        let secs = self
            .get_u64("watch", "rescan-interval-secs")?
            .unwrap_or(DEFAULT_RESCAN_INTERVAL_SECS);
        if secs == 0 {
            return Err(anyhow::anyhow!(
                "watch.rescan-interval-secs must be greater than 0"
            ));
        }
        Ok(Duration::from_secs(secs))
    }
}

/// Discover configuration files in order of precedence.
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(env_path));
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("portwatch").join("config.toml"));
    }
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".portwatch.toml"));
    }
    paths.push(PathBuf::from("./.portwatch.toml"));
    debug!("config discovery paths: {:?}", paths);
    paths
}

/// Parse TOML content into string-keyed sections. Top-level bare keys land
/// in the `base` section.
fn parse_toml_config(content: &str) -> Result<Configuration> {
    let toml_value: Value = content.parse().context("failed to parse TOML content")?;
    let mut config = Configuration::new();

    if let Value::Table(table) = toml_value {
        for (key, value) in table {
            match value {
                Value::Table(section) => {
                    let entries = section
                        .iter()
                        .map(|(k, v)| (k.clone(), toml_value_to_string(v)))
                        .collect();
                    config.insert(key, entries);
                }
                other => {
                    config
                        .entry("base".to_string())
                        .or_default()
                        .insert(key, toml_value_to_string(&other));
                }
            }
        }
    }
    Ok(config)
}

fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}
