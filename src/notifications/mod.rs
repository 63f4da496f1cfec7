//! Delivery of refreshed prediction batches.
//!
//! Every forward refresh hands its whole batch to one [`NotificationEmitter`]
//! call. Delivery failures are reported to the caller, which logs them; they
//! never undo the refresh.

pub mod broadcast;
pub mod log;
pub mod webhook;

pub use broadcast::{BroadcastEmitter, EmitterStats};
pub use log::LogEmitter;
pub use webhook::WebhookEmitter;

use crate::config::NotificationConfig;
use crate::error::{AppError, Result};
use crate::metrics::ENGINE_METRICS;
use crate::models::PredictionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast as channel;
use tracing::{error, info};

/// Receives each refreshed prediction batch
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn emit(&self, batch: &[PredictionRecord]) -> Result<()>;

    /// Emitter name used in logs and metrics
    fn name(&self) -> &str;
}

/// Event pushed to subscribers after a forward refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionsUpdated {
    pub event: String,
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
    pub count: usize,
    pub predictions: Vec<PredictionRecord>,
}

impl PredictionsUpdated {
    pub const EVENT: &'static str = "predictions_updated";

    pub fn from_batch(batch: &[PredictionRecord]) -> Self {
        let first = batch.first();
        Self {
            event: Self::EVENT.to_string(),
            model_version: first.map(|r| r.model_version.clone()).unwrap_or_default(),
            generated_at: first.map(|r| r.generated_at).unwrap_or_else(Utc::now),
            count: batch.len(),
            predictions: batch.to_vec(),
        }
    }
}

/// Forwards every batch to all configured emitters
pub struct FanoutEmitter {
    emitters: Vec<Arc<dyn NotificationEmitter>>,
    broadcast: Option<BroadcastEmitter>,
}

impl FanoutEmitter {
    pub fn new() -> Self {
        Self {
            emitters: Vec::new(),
            broadcast: None,
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn NotificationEmitter>) -> Self {
        self.emitters.push(emitter);
        self
    }

    pub fn with_broadcast(mut self, broadcast: BroadcastEmitter) -> Self {
        self.emitters.push(Arc::new(broadcast.clone()));
        self.broadcast = Some(broadcast);
        self
    }

    /// Subscribe to the in-process channel, when one is configured
    pub fn subscribe(&self) -> Option<channel::Receiver<Arc<PredictionsUpdated>>> {
        self.broadcast.as_ref().map(|b| b.subscribe())
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }
}

impl Default for FanoutEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationEmitter for FanoutEmitter {
    async fn emit(&self, batch: &[PredictionRecord]) -> Result<()> {
        // Emitters run concurrently; one slow subscriber delays only itself
        let results = join_all(self.emitters.iter().map(|emitter| emitter.emit(batch))).await;

        let mut failures = Vec::new();
        for (emitter, result) in self.emitters.iter().zip(results) {
            match result {
                Ok(()) => ENGINE_METRICS.record_notification(emitter.name(), true),
                Err(e) => {
                    ENGINE_METRICS.record_notification(emitter.name(), false);
                    error!(emitter = emitter.name(), error = %e, "Prediction batch delivery failed");
                    failures.push(format!("{}: {}", emitter.name(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::Notification(failures.join("; ")))
        }
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

/// Build the emitter chain described by the configuration
pub fn build_emitter(config: &NotificationConfig) -> Result<FanoutEmitter> {
    let mut fanout =
        FanoutEmitter::new().with_broadcast(BroadcastEmitter::new(config.broadcast_capacity));

    if config.log_enabled {
        fanout = fanout.with_emitter(Arc::new(LogEmitter::new()));
    }

    if config.webhook_enabled {
        let url = config.webhook_url.clone().ok_or_else(|| {
            AppError::Configuration(
                "Webhook notifications enabled but no webhook_url configured".to_string(),
            )
        })?;
        fanout = fanout.with_emitter(Arc::new(WebhookEmitter::new(
            url,
            config.webhook_timeout_secs,
        )?));
    }

    info!(emitters = fanout.len(), "Notification emitters configured");
    Ok(fanout)
}
