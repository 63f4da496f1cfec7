//! Configuration for the scheduler module

use serde::{Deserialize, Serialize};

/// Configuration for the retrain scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether cron jobs are registered at all
    pub enabled: bool,

    /// Run a forward refresh when a stale cache read asks for one
    pub revalidation_enabled: bool,

    /// Predefined jobs configuration
    pub jobs: JobsConfig,
}

/// Configuration for predefined scheduled jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Full model retrain
    pub weekly_retrain: JobConfig,

    /// Forward prediction refresh
    pub forward_refresh: JobConfig,

    /// Model accuracy check
    pub health_check: JobConfig,
}

/// Configuration for a single scheduled job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    /// Whether this job is enabled
    pub enabled: bool,

    /// Cron expression with seconds (`sec min hour dom month dow`)
    pub schedule: String,
}

impl JobConfig {
    pub fn new(schedule: impl Into<String>) -> Self {
        Self {
            enabled: true,
            schedule: schedule.into(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            revalidation_enabled: true,
            jobs: JobsConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            weekly_retrain: JobConfig::new("0 0 23 * * Sun"), // Sunday 23:00
            forward_refresh: JobConfig::new("0 0 * * * *"),   // Top of every hour
            health_check: JobConfig::new("0 0 */12 * * *"),   // Every 12 hours
        }
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn revalidation(mut self, enabled: bool) -> Self {
        self.config.revalidation_enabled = enabled;
        self
    }

    pub fn weekly_retrain(mut self, schedule: impl Into<String>) -> Self {
        self.config.jobs.weekly_retrain = JobConfig::new(schedule);
        self
    }

    pub fn forward_refresh(mut self, schedule: impl Into<String>) -> Self {
        self.config.jobs.forward_refresh = JobConfig::new(schedule);
        self
    }

    pub fn health_check(mut self, schedule: impl Into<String>) -> Self {
        self.config.jobs.health_check = JobConfig::new(schedule);
        self
    }

    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
