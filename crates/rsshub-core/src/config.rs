use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::duration::parse_duration;
use crate::{Error, Result};

/// Environment variable overriding `aggregator.interval`
pub const ENV_INTERVAL: &str = "RSSHUB_INTERVAL";
/// Environment variable overriding `aggregator.workers`
pub const ENV_WORKERS: &str = "RSSHUB_WORKERS";
/// Environment variable overriding `control.addr`
pub const ENV_CONTROL_ADDR: &str = "RSSHUB_CONTROL_ADDR";
/// Environment variable overriding `general.data_dir`
pub const ENV_DATA_DIR: &str = "RSSHUB_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Delay between scheduler ticks (e.g. "3m", "90s")
    #[serde(default = "default_interval", with = "crate::duration::text")]
    pub interval: Duration,
    /// Initial size of the fetch worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// TCP address of the runtime control endpoint
    #[serde(default = "default_control_addr")]
    pub addr: String,
    /// Client-side timeout for control requests in seconds
    #[serde(default = "default_control_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            addr: default_control_addr(),
            request_timeout_secs: default_control_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub request_timeout_secs: u64,
    /// HTTP proxy URL for feed fetching (e.g., "http://127.0.0.1:7890" or "socks5://127.0.0.1:1080")
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Maximum accepted feed body size in bytes
    #[serde(default = "default_max_feed_bytes")]
    pub max_feed_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_fetch_timeout(),
            proxy_url: None,
            max_feed_bytes: default_max_feed_bytes(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rsshub")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(180)
}

fn default_workers() -> usize {
    3
}

fn default_control_addr() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_control_timeout() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_max_feed_bytes() -> usize {
    5 * 1024 * 1024
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file (or defaults), apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_INTERVAL) {
            self.aggregator.interval = parse_duration(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", ENV_INTERVAL, e)))?;
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            self.aggregator.workers = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{}: '{}' is not a worker count", ENV_WORKERS, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_CONTROL_ADDR) {
            self.control.addr = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_DATA_DIR) {
            self.general.data_dir = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Reject settings the aggregator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.aggregator.interval.is_zero() {
            return Err(Error::Config("aggregator.interval must be greater than zero".to_string()));
        }
        if self.aggregator.workers == 0 {
            return Err(Error::Config("aggregator.workers must be greater than zero".to_string()));
        }
        if self.control.addr.is_empty() {
            return Err(Error::Config("control.addr must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get the configuration file path
    /// Always uses ~/.config/rsshub/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("rsshub")
            .join("config.toml")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("rsshub.db")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }
}
