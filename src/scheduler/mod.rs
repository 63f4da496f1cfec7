//! Scheduled retraining and forward refreshes
//!
//! Three cron jobs run on tokio-cron-scheduler (six-field expressions, UTC):
//!
//! - **weekly_retrain**: full retrain from the incident history
//! - **forward_refresh**: recompute, cache and publish the forward window
//! - **health_check**: retrain early when validation accuracy drops
//!
//! Each kind of work is guarded by a [`RunFlag`]; a trigger that finds the
//! flag held is skipped, never queued.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use transit_risk_engine::scheduler::{RetrainScheduler, SchedulerConfig};
//! # async fn run(service: Arc<transit_risk_engine::ml::PredictionService>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheduler = RetrainScheduler::new(SchedulerConfig::default(), service).await?;
//! scheduler.start().await?;
//! tokio::signal::ctrl_c().await?;
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod core;
mod error;
mod jobs;
mod metrics;
mod tasks;

pub use config::{JobConfig, JobsConfig, SchedulerConfig, SchedulerConfigBuilder};
pub use core::{RetrainScheduler, SchedulerStats};
pub use error::{SchedulerError, SchedulerResult};
pub use jobs::{Job, JobContext, JobId, JobMetadata, JobOutcome, JobStatus, RunFlag, RunGuard};
pub use metrics::{init_scheduler_metrics, SCHEDULER_METRICS};
pub use tasks::{forward_refresh, health_check, weekly_retrain};
