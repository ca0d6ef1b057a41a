use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite checkpoint database. Defaults to `~/.listforge/data/listforge.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Stable owner id for leases. A random id is generated when absent.
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_pipeline_epoch")]
    pub pipeline_epoch: u32,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub allow_missing_images: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceLimit>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_pipeline_epoch() -> u32 {
    1
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            worker_id: None,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            lease_ttl_secs: default_lease_ttl_secs(),
            pipeline_epoch: default_pipeline_epoch(),
            call_timeout_ms: default_call_timeout_ms(),
            allow_missing_images: true,
            retry: RetryConfig::default(),
            services: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Resolved database location.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match self.database_path {
            Some(ref path) => Ok(path.clone()),
            None => crate::db::default_database_path().ok_or(ConfigError::NoDatabasePath),
        }
    }

    /// Configured worker id, or a fresh random one.
    pub fn resolve_worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
    }

    /// Limit for `service`, falling back to one request per second.
    pub fn service_limit(&self, service: &str) -> ServiceLimit {
        self.services.get(service).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Request budget of one external service: `requests` per `per_secs` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimit {
    pub requests: u32,
    #[serde(default = "default_per_secs")]
    pub per_secs: u64,
    /// Bucket size. Defaults to `requests`.
    #[serde(default)]
    pub burst: Option<u32>,
    /// Overrides `retry.max_attempts` for this service.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_per_secs() -> u64 {
    1
}

impl Default for ServiceLimit {
    fn default() -> Self {
        Self {
            requests: 1,
            per_secs: 1,
            burst: None,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
