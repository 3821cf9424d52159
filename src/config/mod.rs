//! # Orchestrator Configuration
//!
//! `FleetConfig` holds every setting the orchestrator reads at start-up. All
//! fields have defaults, so an empty configuration is valid. Values are read
//! once; changing them requires a restart.
//!
//! Sources are layered by [`ConfigManager`]: defaults, then
//! `config/fleet.toml`, then `config/fleet.{environment}.toml`, then
//! `FLEET_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `FLEET_AVAILABLE_RESOURCES__MEMORY_MB`).

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::validation::AvailableResources;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Upper bound on concurrently running jobs
    pub max_concurrent_jobs: usize,
    /// Running jobs older than this (from creation) are failed by the sweep
    pub job_timeout_minutes: u64,
    /// Terminal jobs older than this are deleted by the sweep
    pub log_retention_days: u64,
    /// Idle dispatcher poll period
    pub dispatch_interval_ms: u64,
    pub sweep_interval_seconds: u64,
    /// Per-subscriber live log buffer, in lines
    pub log_subscriber_buffer: usize,
    pub environments: Vec<String>,
    /// Platform used when a request names none
    pub default_platform: String,
    pub available_resources: AvailableResources,
    /// When set, jobs persist to SQLite at this URL
    pub database_url: Option<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            job_timeout_minutes: 60,
            log_retention_days: 7,
            dispatch_interval_ms: 500,
            sweep_interval_seconds: 30,
            log_subscriber_buffer: 1024,
            environments: vec![
                "staging".to_string(),
                "production".to_string(),
                "preprod".to_string(),
            ],
            default_platform: "ubuntu".to_string(),
            available_resources: AvailableResources::default(),
            database_url: None,
        }
    }
}

impl FleetConfig {
    /// Running time allowed per job; `None` when too large to represent,
    /// which means jobs never time out
    pub fn job_timeout(&self) -> Option<chrono::TimeDelta> {
        i64::try_from(self.job_timeout_minutes)
            .ok()
            .and_then(chrono::TimeDelta::try_minutes)
    }

    /// How long terminal jobs are kept; `None` means forever
    pub fn log_retention(&self) -> Option<chrono::TimeDelta> {
        i64::try_from(self.log_retention_days)
            .ok()
            .and_then(chrono::TimeDelta::try_days)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_concurrent_jobs",
                "0",
                "at least one job must be able to run",
            ));
        }

        if self.job_timeout_minutes == 0 {
            return Err(ConfigurationError::invalid_value(
                "job_timeout_minutes",
                "0",
                "timeout must be greater than 0",
            ));
        }

        if self.log_subscriber_buffer == 0 {
            return Err(ConfigurationError::invalid_value(
                "log_subscriber_buffer",
                "0",
                "subscriber buffer must hold at least one line",
            ));
        }

        if self.dispatch_interval_ms == 0 || self.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch_interval_ms/sweep_interval_seconds",
                "0",
                "background intervals must be greater than 0",
            ));
        }

        if self.environments.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "environments",
                "[]",
                "at least one deployment environment is required",
            ));
        }

        if let Some(blank) = self.environments.iter().find(|e| e.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value(
                "environments",
                blank.clone(),
                "environment names must not be blank",
            ));
        }

        if self.default_platform.is_empty()
            || self.default_platform == crate::catalog::UNIVERSAL_PLATFORM
        {
            return Err(ConfigurationError::invalid_value(
                "default_platform",
                self.default_platform.clone(),
                "must name a concrete platform",
            ));
        }

        Ok(())
    }
}
