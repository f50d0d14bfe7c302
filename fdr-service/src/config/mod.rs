//! Configuration module for fdr-service.

use fdr_core::config::{self as core_config, env_or};
use fdr_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FdrConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub batch: BatchConfig,
    pub event_manager: EventManagerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Key of the manual-trigger marker in `batch_controls`.
    pub batch_code: String,
    pub page_size: u32,
    pub interval_secs: u64,
    pub control_poll_secs: u64,
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn control_poll_interval(&self) -> Duration {
        Duration::from_secs(self.control_poll_secs.max(1))
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_code: "fdr-acquisition".to_string(),
            page_size: 100,
            interval_secs: 300,
            control_poll_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventManagerConfig {
    /// Empty disables delivery.
    pub url: String,
    pub timeout_ms: u64,
    pub queue_size: usize,
}

impl EventManagerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl FdrConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let batch_defaults = BatchConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "fdr-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            batch: BatchConfig {
                enabled: env_or("BATCH_ENABLED", batch_defaults.enabled),
                batch_code: env::var("BATCH_CODE").unwrap_or(batch_defaults.batch_code),
                page_size: env_or("BATCH_PAGE_SIZE", batch_defaults.page_size),
                interval_secs: env_or("BATCH_INTERVAL_SECS", batch_defaults.interval_secs),
                control_poll_secs: env_or(
                    "BATCH_CONTROL_POLL_SECS",
                    batch_defaults.control_poll_secs,
                ),
            },
            event_manager: EventManagerConfig {
                url: env::var("EVENT_MANAGER_URL").unwrap_or_default(),
                timeout_ms: env_or("EVENT_MANAGER_TIMEOUT_MS", 5_000),
                queue_size: env_or("EVENT_QUEUE_SIZE", 1_024),
            },
        })
    }
}
