//! Configuration loading from a TOML file and environment variables.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Duration;

use crate::{
    bus::handle::BusConfig,
    types::{DEFAULT_EVENT_SOURCE, DEFAULT_TABLE_NAME},
};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source tag shared by the publisher and the routing rule.
    pub event_source: String,
    /// Note table settings.
    pub store: StoreConfig,
    /// Event bus settings.
    pub bus: BusConfig,
    /// API gate settings.
    pub api: ApiConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
            store: StoreConfig::default(),
            bus: BusConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which table implementation backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local table, lost on exit.
    Memory,
    /// SQLite file at [`StoreConfig::db_path`].
    #[default]
    Sqlite,
}

/// Note table settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Table implementation.
    pub backend: StoreBackend,
    /// Name of the table both write paths address.
    pub table_name: String,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Bound on each store call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            db_path: PathBuf::from("notes.db"),
            timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Bound on each store call.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// API gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Shared secret every request must present.
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: "dev-api-key".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `notebus=debug,info`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value was present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `NOTES_TABLE` overrides `store.table_name`
/// - `NOTES_DB_PATH` overrides `store.db_path`
/// - `NOTES_API_KEY` overrides `api.api_key`
/// - `NOTES_EVENT_SOURCE` overrides `event_source`
/// - `NOTES_LOG_LEVEL` overrides `logging.level`
/// - `NOTES_LOG_JSON` overrides `logging.json` ("true" or "1" to enable)
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parses configuration from TOML text without applying overrides.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

impl Config {
    /// Applies `NOTES_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(table) = lookup("NOTES_TABLE") {
            self.store.table_name = table;
        }
        if let Some(path) = lookup("NOTES_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(key) = lookup("NOTES_API_KEY") {
            self.api.api_key = key;
        }
        if let Some(source) = lookup("NOTES_EVENT_SOURCE") {
            self.event_source = source;
        }
        if let Some(level) = lookup("NOTES_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("NOTES_LOG_JSON") {
            self.logging.json = json == "true" || json == "1";
        }
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_source.trim().is_empty() {
            return Err(ConfigError::Invalid("event_source must not be empty".into()));
        }
        if self.api.api_key.is_empty() {
            return Err(ConfigError::Invalid("api.api_key must not be empty".into()));
        }
        crate::store::validate_table_name(&self.store.table_name)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
