use crate::error::Result;
use crate::models::{PredictionRecord, PredictionSource};
use crate::notifications::NotificationEmitter;
use async_trait::async_trait;
use tracing::info;

/// Writes a summary of each batch to the log
#[derive(Debug, Clone, Default)]
pub struct LogEmitter;

impl LogEmitter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, batch: &[PredictionRecord]) -> Result<()> {
        let heuristic = batch
            .iter()
            .filter(|r| r.source == PredictionSource::Heuristic)
            .count();
        let peak = batch
            .iter()
            .max_by(|a, b| a.risk_score.total_cmp(&b.risk_score));

        info!(
            count = batch.len(),
            heuristic = heuristic,
            model_version = batch.first().map(|r| r.model_version.as_str()).unwrap_or(""),
            peak_station = peak.map(|r| r.station.as_str()).unwrap_or(""),
            peak_risk = peak.map(|r| r.risk_score).unwrap_or(0.0),
            "📣 Predictions updated"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
