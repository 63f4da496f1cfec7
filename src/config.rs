use crate::ml::MLConfig;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Incident source configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Model training configuration
    #[serde(default)]
    pub ml: MLConfig,

    /// Prediction cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Scheduled jobs configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Notification configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Stations that always receive forward predictions
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("TRANSIT_RISK_CONFIG")
            .unwrap_or_else(|_| "config/local.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: TRANSIT_RISK__)
            .add_source(
                config::Environment::with_prefix("TRANSIT_RISK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Names of the configured stations
    pub fn station_names(&self) -> Vec<String> {
        self.stations.iter().map(|s| s.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Incident source backend
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database
    pub path: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: Some(PathBuf::from("data/incidents")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of hourly buckets covered by each forward refresh
    #[serde(default = "default_forward_hours")]
    pub forward_hours: u32,

    /// Lifetime of batch-refreshed entries (seconds)
    #[serde(default = "default_forward_ttl")]
    pub forward_ttl_secs: u64,

    /// Lifetime of entries computed on a cache miss (seconds)
    #[serde(default = "default_on_demand_ttl")]
    pub on_demand_ttl_secs: u64,

    /// Maximum number of on-demand entries
    #[serde(default = "default_on_demand_capacity")]
    pub on_demand_capacity: u64,

    /// Snapshot file written after every forward refresh
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl CacheConfig {
    pub fn forward_ttl(&self) -> Duration {
        Duration::from_secs(self.forward_ttl_secs)
    }

    pub fn on_demand_ttl(&self) -> Duration {
        Duration::from_secs(self.on_demand_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            forward_hours: default_forward_hours(),
            forward_ttl_secs: default_forward_ttl(),
            on_demand_ttl_secs: default_on_demand_ttl(),
            on_demand_capacity: default_on_demand_capacity(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Log every published batch
    #[serde(default = "default_true")]
    pub log_enabled: bool,

    /// Capacity of the in-process broadcast channel
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Enable webhook notifications
    #[serde(default)]
    pub webhook_enabled: bool,

    /// Webhook URL receiving `predictions_updated` events
    pub webhook_url: Option<String>,

    /// Webhook timeout (seconds)
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log_enabled: true,
            broadcast_capacity: default_broadcast_capacity(),
            webhook_enabled: false,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

// Default value functions
fn default_forward_hours() -> u32 {
    24
}

fn default_forward_ttl() -> u64 {
    7200
}

fn default_on_demand_ttl() -> u64 {
    3600
}

fn default_on_demand_capacity() -> u64 {
    10_000
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/predictions_cache.json")
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_forward_hours(), 24);
        assert_eq!(default_forward_ttl(), 7200);
        assert_eq!(default_log_level(), "info");
        assert!(default_true());
    }

    #[test]
    fn test_state_backend() {
        assert_eq!(StateBackend::default(), StateBackend::Sled);
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.ml.sequence_length, 24);
        assert_eq!(config.stations.len(), 15);
        assert_eq!(config.scheduler.jobs.weekly_retrain.schedule, "0 0 23 * * Sun");
        assert_eq!(config.cache.forward_ttl(), Duration::from_secs(7200));
    }
}
