//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;
use transit_risk_engine::{
    config::CacheConfig,
    error::{AppError, Result},
    ml::{
        MLConfig, ModelArtifact, ModelFactory, PredictionService, RiskModel, Sequence,
        TrainingDiagnostics, TrainingStatus,
    },
    models::{IncidentEvent, IncidentType, PredictionRecord, RiskEstimate},
    notifications::NotificationEmitter,
    state::{InMemoryIncidentSource, IncidentSource, PredictionCache},
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

/// One theft per hour at `station` for `hours` consecutive hours
pub fn hourly_events(station: &str, hours: i64) -> Vec<IncidentEvent> {
    (0..hours)
        .map(|h| {
            IncidentEvent::new(
                IncidentType::Theft,
                base_time() + Duration::hours(h) + Duration::minutes(10),
                station,
                4.65,
                -74.08,
            )
        })
        .collect()
}

/// Runs of 30 busy hours separated by two quiet hours; enough windows of
/// both labels to train on
pub fn bursty_events(station: &str, runs: i64) -> Vec<IncidentEvent> {
    let mut events = Vec::new();
    for run in 0..runs {
        for h in 0..30 {
            let incident_type = if h % 3 == 0 {
                IncidentType::Pickpocketing
            } else {
                IncidentType::Theft
            };
            events.push(IncidentEvent::new(
                incident_type,
                base_time() + Duration::hours(run * 32 + h) + Duration::minutes(5),
                station,
                4.6,
                -74.1,
            ));
        }
    }
    events.push(IncidentEvent::new(
        IncidentType::Theft,
        base_time() + Duration::hours(runs * 32 + 1),
        station,
        4.6,
        -74.1,
    ));
    events
}

/// Source that returns its log exactly as stored, out-of-order entries included
pub struct RawLogSource {
    pub events: Vec<IncidentEvent>,
}

#[async_trait]
impl IncidentSource for RawLogSource {
    async fn events(&self, station: Option<&str>) -> Result<Vec<IncidentEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| station.map_or(true, |s| e.station == s))
            .cloned()
            .collect())
    }

    async fn stations(&self) -> Result<Vec<String>> {
        let mut stations: Vec<String> = self.events.iter().map(|e| e.station.clone()).collect();
        stations.sort();
        stations.dedup();
        Ok(stations)
    }
}

/// Emitter that keeps every batch it receives
#[derive(Default)]
pub struct RecordingEmitter {
    pub batches: Mutex<Vec<Vec<PredictionRecord>>>,
}

impl RecordingEmitter {
    pub fn calls(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn last_batch(&self) -> Option<Vec<PredictionRecord>> {
        self.batches.lock().last().cloned()
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn emit(&self, batch: &[PredictionRecord]) -> Result<()> {
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Emitter whose deliveries always fail
pub struct FailingEmitter;

#[async_trait]
impl NotificationEmitter for FailingEmitter {
    async fn emit(&self, _batch: &[PredictionRecord]) -> Result<()> {
        Err(AppError::Notification("subscriber unreachable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Model whose training blocks the worker thread for `delay`
pub struct SlowModel {
    delay: std::time::Duration,
}

impl RiskModel for SlowModel {
    fn train(&mut self, sequences: &[Sequence]) -> (Option<ModelArtifact>, TrainingDiagnostics) {
        std::thread::sleep(self.delay);
        (
            None,
            TrainingDiagnostics::started(sequences.len())
                .fail(TrainingStatus::Failed, "slow model never converges"),
        )
    }

    fn predict(&self, _station: &str, _at: DateTime<Utc>) -> Option<RiskEstimate> {
        None
    }
}

pub struct SlowModelFactory {
    pub delay: std::time::Duration,
}

impl ModelFactory for SlowModelFactory {
    fn create(&self) -> Box<dyn RiskModel> {
        Box::new(SlowModel { delay: self.delay })
    }

    fn restore(&self, artifact: &ModelArtifact) -> Result<Box<dyn RiskModel>> {
        Err(AppError::Validation(format!(
            "slow model cannot restore {}",
            artifact.version_id
        )))
    }
}

pub fn ml_config(dir: &TempDir) -> MLConfig {
    MLConfig {
        model_dir: dir.path().join("models"),
        ..Default::default()
    }
}

pub fn cache_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        snapshot_path: dir.path().join("predictions_cache.json"),
        ..Default::default()
    }
}

/// Service over an in-memory source holding `events`
pub fn service_with(
    dir: &TempDir,
    events: Vec<IncidentEvent>,
    emitter: Arc<dyn NotificationEmitter>,
) -> PredictionService {
    let cache = Arc::new(PredictionCache::new(cache_config(dir)));
    PredictionService::new(
        ml_config(dir),
        cache,
        Arc::new(InMemoryIncidentSource::with_events(events)),
        emitter,
    )
}
