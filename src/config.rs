use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the job does when a slice exhausts its retry budget
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any permanently failed slice moves the job to ERRORED
    #[default]
    RequireAll,
    /// Failed slices count as resolved; the job may still reach DONE
    AllowPartial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Scheduling tick in milliseconds (dispatch + stall scan)
    pub tick_ms: u64,
    /// A dispatched slice with no progress for this long is stalled
    pub stall_deadline_ms: u64,
    /// NOPROGRESS warnings emitted before the slice is abandoned and re-queued
    pub stall_warnings_before_abandon: u32,
    /// Re-dispatch attempts allowed after the first one
    pub max_retries: u32,
    pub failure_policy: FailurePolicy,
    /// Capacity of the executor signal channel
    pub signal_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            stall_deadline_ms: 30_000,
            stall_warnings_before_abandon: 2,
            max_retries: 3,
            failure_policy: FailurePolicy::RequireAll,
            signal_buffer: 1024,
        }
    }
}

impl DispatchConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn stall_deadline(&self) -> Duration {
        Duration::from_millis(self.stall_deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingConfig {
    /// How often the payment account balance is re-read while dispatch is paused
    pub poll_interval_ms: u64,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
        }
    }
}

impl FundingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Reference price served by the fixed in-process oracle
    pub reference_price: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            reference_price: Decimal::new(1, 4),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("JOBMESH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // JOBMESH__DISPATCH__MAX_RETRIES=5, etc.
            .add_source(
                Environment::with_prefix("JOBMESH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.failure_policy, FailurePolicy::RequireAll);
        assert_eq!(config.tick(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent/jobmesh-config").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.dispatch.stall_warnings_before_abandon, 2);
        assert_eq!(config.funding.poll_interval_ms, 5_000);
    }

    #[test]
    fn test_failure_policy_serde() {
        let policy: FailurePolicy = serde_json::from_str("\"allow_partial\"").unwrap();
        assert_eq!(policy, FailurePolicy::AllowPartial);
    }
}
