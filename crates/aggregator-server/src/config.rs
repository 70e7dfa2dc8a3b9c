//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

use crate::aggregator::PipelineSettings;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Dedup store database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ingestion pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Parent directories are created.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Ingestion pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Ingestion queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum events per store transaction.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Pause after a failed batch, in milliseconds.
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "aggregator_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/dedup_store.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_batch_limit() -> usize {
    100
}

fn default_failure_backoff_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_limit: default_batch_limit(),
            failure_backoff_ms: default_failure_backoff_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Connection settings for the pool.
    pub fn runtime_settings(&self) -> aggregator_db::DbRuntimeSettings {
        aggregator_db::DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl PipelineConfig {
    /// Pipeline settings with zero sizes clamped to one.
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            queue_capacity: self.queue_capacity.max(1),
            batch_limit: self.batch_limit.max(1),
            failure_backoff: Duration::from_millis(self.failure_backoff_ms),
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
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `AGGREGATOR_HOST` overrides `server.host`
/// - `AGGREGATOR_PORT` overrides `server.port`
/// - `AGGREGATOR_DB_PATH` overrides `database.path`
/// - `AGGREGATOR_DB_BUSY_TIMEOUT_MS` overrides `database.busy_timeout_ms`
/// - `AGGREGATOR_DB_POOL_MAX_SIZE` overrides `database.pool_max_size`
/// - `AGGREGATOR_QUEUE_CAPACITY` overrides `pipeline.queue_capacity`
/// - `AGGREGATOR_BATCH_LIMIT` overrides `pipeline.batch_limit`
/// - `AGGREGATOR_FAILURE_BACKOFF_MS` overrides `pipeline.failure_backoff_ms`
/// - `AGGREGATOR_LOG_LEVEL` overrides `logging.level`
/// - `AGGREGATOR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// Unparseable numeric overrides are ignored.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
        value.and_then(|v| v.trim().parse().ok())
    }

    if let Some(host) = parsed(var("AGGREGATOR_HOST")) {
        config.server.host = host;
    }
    if let Some(port) = parsed(var("AGGREGATOR_PORT")) {
        config.server.port = port;
    }
    if let Some(db_path) = var("AGGREGATOR_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(ms) = parsed(var("AGGREGATOR_DB_BUSY_TIMEOUT_MS")) {
        config.database.busy_timeout_ms = ms;
    }
    if let Some(size) = parsed(var("AGGREGATOR_DB_POOL_MAX_SIZE")) {
        config.database.pool_max_size = size;
    }
    if let Some(capacity) = parsed(var("AGGREGATOR_QUEUE_CAPACITY")) {
        config.pipeline.queue_capacity = capacity;
    }
    if let Some(limit) = parsed(var("AGGREGATOR_BATCH_LIMIT")) {
        config.pipeline.batch_limit = limit;
    }
    if let Some(ms) = parsed(var("AGGREGATOR_FAILURE_BACKOFF_MS")) {
        config.pipeline.failure_backoff_ms = ms;
    }
    if let Some(level) = var("AGGREGATOR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("AGGREGATOR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
