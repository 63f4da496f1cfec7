use crate::error::Result;
use crate::models::PredictionRecord;
use crate::notifications::{NotificationEmitter, PredictionsUpdated};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Delivery statistics of a [`BroadcastEmitter`]
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EmitterStats {
    pub batches_sent: u64,
    pub records_sent: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// In-process channel that a push transport can subscribe to
#[derive(Clone)]
pub struct BroadcastEmitter {
    sender: broadcast::Sender<Arc<PredictionsUpdated>>,
    stats: Arc<Mutex<EmitterStats>>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(Mutex::new(EmitterStats::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PredictionsUpdated>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EmitterStats {
        self.stats.lock().clone()
    }
}

#[async_trait]
impl NotificationEmitter for BroadcastEmitter {
    async fn emit(&self, batch: &[PredictionRecord]) -> Result<()> {
        let event = Arc::new(PredictionsUpdated::from_batch(batch));

        // No subscribers is not a delivery failure
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers = receivers, count = batch.len(), "Prediction batch broadcast"),
            Err(_) => debug!(count = batch.len(), "Prediction batch broadcast without subscribers"),
        }

        let mut stats = self.stats.lock();
        stats.batches_sent += 1;
        stats.records_sent += batch.len() as u64;
        stats.last_sent_at = Some(Utc::now());
        Ok(())
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}
