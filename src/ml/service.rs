use crate::error::{AppError, Result};
use crate::metrics::ENGINE_METRICS;
use crate::ml::classifier::{ModelFactory, RiskModel, SequenceModelFactory};
use crate::ml::features::FeatureBuilder;
use crate::ml::heuristic::HeuristicFallbackModel;
use crate::ml::models::{MLConfig, ModelArtifact, TrainingDiagnostics, TrainingStatus};
use crate::ml::registry::ArtifactStore;
use crate::ml::sequence::{Sequence, SequenceEncoder};
use crate::models::{
    next_occurrence, truncate_to_hour, PredictionRecord, PredictionSource, RiskEstimate,
};
use crate::notifications::NotificationEmitter;
use crate::scheduler::RunFlag;
use crate::state::{CacheLookup, IncidentSource, PredictionCache};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// `model_version` of records produced while no trained model is active
pub const HEURISTIC_VERSION: &str = "heuristic";

/// The trained model currently serving predictions
pub struct ActiveModel {
    pub model: Arc<dyn RiskModel>,
    pub artifact: ModelArtifact,
}

/// Result of a retrain request
#[derive(Debug, Clone)]
pub enum RetrainOutcome {
    /// Another retrain was running; nothing was done
    Skipped,
    /// A new model is active
    Trained {
        version: String,
        diagnostics: TrainingDiagnostics,
    },
    /// Training produced no usable model; the previous one stays active
    Rejected(TrainingDiagnostics),
}

/// Result of a forward refresh request
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Skipped,
    Completed {
        records: usize,
        model_version: String,
        notified: bool,
    },
}

/// Result of a model health check
#[derive(Debug, Clone)]
pub enum HealthOutcome {
    /// No accuracy figure to judge yet
    NoMetrics,
    Healthy { accuracy: f64 },
    Retrained {
        accuracy: f64,
        outcome: RetrainOutcome,
    },
}

/// Snapshot of the model state for operators
#[derive(Debug, Clone, Serialize)]
pub struct ModelInsights {
    pub status: String,
    pub model_type: String,
    pub model_version: Option<String>,
    pub accuracy: Option<f64>,
    pub last_trained: Option<DateTime<Utc>>,
    pub last_training: Option<TrainingDiagnostics>,
    pub cached_predictions: usize,
    pub cold_start_stations: Vec<String>,
    pub retrain_running: bool,
    pub refresh_running: bool,
}

/// Risk prediction service.
///
/// Reads go cache first, then the active trained model, then the heuristic
/// fallback. Writes (retrain, forward refresh) are guarded by one run flag
/// each; a trigger that finds its flag held returns `Skipped`.
pub struct PredictionService {
    config: MLConfig,
    cache: Arc<PredictionCache>,
    source: Arc<dyn IncidentSource>,
    emitter: Arc<dyn NotificationEmitter>,
    factory: Arc<dyn ModelFactory>,
    fallback: HeuristicFallbackModel,
    artifacts: ArtifactStore,
    stations: Vec<String>,
    active: RwLock<Option<Arc<ActiveModel>>>,
    last_diagnostics: RwLock<Option<TrainingDiagnostics>>,
    retrain_flag: Arc<RunFlag>,
    refresh_flag: Arc<RunFlag>,
}

impl PredictionService {
    pub fn new(
        config: MLConfig,
        cache: Arc<PredictionCache>,
        source: Arc<dyn IncidentSource>,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Self {
        Self {
            factory: Arc::new(SequenceModelFactory::new(config.clone())),
            fallback: HeuristicFallbackModel::new(config.heuristic_seed),
            artifacts: ArtifactStore::new(config.model_dir.clone()),
            config,
            cache,
            source,
            emitter,
            stations: Vec::new(),
            active: RwLock::new(None),
            last_diagnostics: RwLock::new(None),
            retrain_flag: RunFlag::new(),
            refresh_flag: RunFlag::new(),
        }
    }

    /// Use a different model implementation
    pub fn with_factory(mut self, factory: Arc<dyn ModelFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Stations that receive forward predictions even without history
    pub fn with_stations(mut self, stations: Vec<String>) -> Self {
        self.stations = stations;
        self
    }

    pub fn config(&self) -> &MLConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PredictionCache> {
        &self.cache
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn active_model(&self) -> Option<Arc<ActiveModel>> {
        self.active.read().clone()
    }

    pub fn active_version(&self) -> Option<String> {
        self.active_model().map(|a| a.artifact.version_id.clone())
    }

    pub fn last_diagnostics(&self) -> Option<TrainingDiagnostics> {
        self.last_diagnostics.read().clone()
    }

    pub fn is_retraining(&self) -> bool {
        self.retrain_flag.is_running()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_flag.is_running()
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Risk for `station` at the next occurrence of `hour` (0-23, UTC)
    pub async fn get_risk(&self, station: &str, hour: u32) -> Result<RiskEstimate> {
        if hour >= 24 {
            return Err(AppError::Validation(format!(
                "hour must be in 0..24, got {}",
                hour
            )));
        }

        let bucket = next_occurrence(Utc::now(), hour);
        Ok(self.get_risk_at(station, bucket).await?.estimate())
    }

    /// Prediction for the hour bucket containing `at`
    pub async fn get_risk_at(&self, station: &str, at: DateTime<Utc>) -> Result<PredictionRecord> {
        let bucket = truncate_to_hour(at);

        match self.cache.get(station, bucket).await {
            CacheLookup::Fresh(record) | CacheLookup::Stale(record) => return Ok(record),
            CacheLookup::Miss => {}
        }

        let active = self.active_model();
        let (version, generated_at) = (Self::cycle_version(active.as_deref()), Utc::now());
        let record = self.predict_record(active.as_deref(), station, bucket, generated_at, &version)?;

        ENGINE_METRICS
            .predictions_served
            .with_label_values(&[record.source.to_string().as_str()])
            .inc();
        debug!(station = station, bucket = %bucket, source = %record.source, "Prediction computed on cache miss");

        self.cache.insert_on_demand(record.clone()).await;
        Ok(record)
    }

    /// Predictions for every known station over the next `horizon_hours`
    /// hour buckets, ordered by time then station.
    ///
    /// Served from the cached forward window; when the cache holds nothing for
    /// the window the batch is computed on the spot without being cached.
    pub async fn get_forward_predictions(&self, horizon_hours: u32) -> Result<Vec<PredictionRecord>> {
        let now = Utc::now();
        let cached = self.cache.forward_window(now, horizon_hours);
        if !cached.is_empty() || horizon_hours == 0 {
            return Ok(cached);
        }

        debug!(horizon_hours = horizon_hours, "Forward window not cached, computing");
        let (records, _) = self.compute_window(now, horizon_hours).await?;
        Ok(records)
    }

    fn cycle_version(active: Option<&ActiveModel>) -> String {
        active
            .map(|a| a.artifact.version_id.clone())
            .unwrap_or_else(|| HEURISTIC_VERSION.to_string())
    }

    /// Trained model first, heuristic when it declines or misbehaves
    fn predict_record(
        &self,
        active: Option<&ActiveModel>,
        station: &str,
        bucket: DateTime<Utc>,
        generated_at: DateTime<Utc>,
        version: &str,
    ) -> Result<PredictionRecord> {
        if let Some(active) = active {
            if let Some(estimate) = active.model.predict(station, bucket) {
                if estimate.is_valid() {
                    return Ok(PredictionRecord::new(
                        station,
                        bucket,
                        estimate,
                        generated_at,
                        version,
                        PredictionSource::Model,
                    ));
                }
                warn!(station = station, bucket = %bucket, "Trained model returned an invalid score");
            }
        }

        let estimate = self
            .fallback
            .predict(station, bucket)
            .ok_or_else(|| AppError::PredictionUnavailable {
                station: station.to_string(),
                bucket: bucket.to_rfc3339(),
            })?;

        Ok(PredictionRecord::new(
            station,
            bucket,
            estimate,
            generated_at,
            version,
            PredictionSource::Heuristic,
        ))
    }

    /// Incident stations merged with the configured ones
    async fn known_stations(&self) -> Vec<String> {
        let mut stations: BTreeSet<String> = self.stations.iter().cloned().collect();
        match self.source.stations().await {
            Ok(found) => stations.extend(found),
            Err(e) => warn!(error = %e, "Failed to list incident stations, using configured stations"),
        }
        stations.into_iter().collect()
    }

    async fn compute_window(
        &self,
        now: DateTime<Utc>,
        horizon_hours: u32,
    ) -> Result<(Vec<PredictionRecord>, String)> {
        let stations = self.known_stations().await;
        let start = truncate_to_hour(now);

        // One model snapshot for the whole cycle
        let active = self.active_model();
        let version = Self::cycle_version(active.as_deref());
        let generated_at = Utc::now();

        let mut records = Vec::with_capacity(stations.len() * horizon_hours as usize);
        for offset in 0..horizon_hours {
            let bucket = start + Duration::hours(offset as i64);
            for station in &stations {
                records.push(self.predict_record(
                    active.as_deref(),
                    station,
                    bucket,
                    generated_at,
                    &version,
                )?);
            }
        }

        Ok((records, version))
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Train a new model from the full incident history and swap it in.
    ///
    /// Training runs on a blocking worker under `training_timeout_ms`. The
    /// retrain flag stays held until that worker returns, even when the wait
    /// for it timed out.
    pub async fn retrain(&self) -> Result<RetrainOutcome> {
        let Some(guard) = self.retrain_flag.try_acquire() else {
            info!("Retrain already running, skipping trigger");
            ENGINE_METRICS.record_retrain("skipped", None);
            return Ok(RetrainOutcome::Skipped);
        };

        // A source outage or an out-of-order log rejects this cycle only
        let sequences = match self.training_sequences().await {
            Ok(sequences) => sequences,
            Err(e) => {
                let diagnostics = TrainingDiagnostics::started(0).fail(
                    TrainingStatus::Failed,
                    format!("cannot load training data: {}", e),
                );
                return Ok(self.reject(diagnostics));
            }
        };

        let pending = TrainingDiagnostics::started(sequences.len());
        let mut model = self.factory.create();
        let worker = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let (artifact, diagnostics) = model.train(&sequences);
            (model, artifact, diagnostics)
        });

        let budget = self.config.training_timeout();
        let (model, artifact, diagnostics) = match tokio::time::timeout(budget, worker).await {
            Ok(Ok((model, artifact, diagnostics))) => (Some(model), artifact, diagnostics),
            Ok(Err(join_error)) => (
                None,
                None,
                pending.fail(
                    TrainingStatus::Failed,
                    format!("training worker aborted: {}", join_error),
                ),
            ),
            Err(_) => (
                None,
                None,
                pending.fail(
                    TrainingStatus::TimedOut,
                    format!("training exceeded {} ms", budget.as_millis()),
                ),
            ),
        };

        match (model, artifact) {
            (Some(model), Some(artifact)) if diagnostics.is_success() => {
                *self.last_diagnostics.write() = Some(diagnostics.clone());
                let version = artifact.version_id.clone();
                self.persist(&artifact).await;
                self.install(Arc::from(model), artifact);

                let duration_secs = diagnostics.duration_ms as f64 / 1000.0;
                ENGINE_METRICS.record_retrain("trained", Some(duration_secs));
                info!(
                    model_version = %version,
                    duration_ms = diagnostics.duration_ms,
                    accuracy = diagnostics.accuracy().unwrap_or_default(),
                    "✅ Model trained and activated"
                );
                Ok(RetrainOutcome::Trained {
                    version,
                    diagnostics,
                })
            }
            _ => Ok(self.reject(diagnostics)),
        }
    }

    async fn training_sequences(&self) -> Result<Vec<Sequence>> {
        let events = self.source.events(None).await?;
        let features = FeatureBuilder::new().build(&events)?;
        let sequences = SequenceEncoder::new(self.config.sequence_length).encode(&features);

        info!(
            events = events.len(),
            feature_records = features.len(),
            sequences = sequences.len(),
            "🧠 Starting model training"
        );
        Ok(sequences)
    }

    fn reject(&self, diagnostics: TrainingDiagnostics) -> RetrainOutcome {
        *self.last_diagnostics.write() = Some(diagnostics.clone());
        let duration_secs = diagnostics.duration_ms as f64 / 1000.0;
        ENGINE_METRICS.record_retrain(diagnostics.status.as_str(), Some(duration_secs));
        warn!(
            status = diagnostics.status.as_str(),
            error = diagnostics.error.as_deref().unwrap_or(""),
            duration_ms = diagnostics.duration_ms,
            active_version = ?self.active_version(),
            "Training produced no model, keeping the active one"
        );
        RetrainOutcome::Rejected(diagnostics)
    }

    /// Admin entry point for an out-of-schedule retrain
    pub async fn trigger_retrain(&self) -> Result<RetrainOutcome> {
        info!("Manual retrain requested");
        self.retrain().await
    }

    async fn persist(&self, artifact: &ModelArtifact) {
        let store = self.artifacts.clone();
        let keep = self.config.keep_versions;
        let owned = artifact.clone();
        let saved = tokio::task::spawn_blocking(move || {
            store.save(&owned)?;
            if let Err(e) = store.prune(keep) {
                warn!(error = %e, "Failed to prune old model artifacts");
            }
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("artifact writer aborted: {}", e)))
        .and_then(|result| result);

        // The model still serves from memory; the next cold start retrains
        if let Err(e) = saved {
            error!(model_version = %artifact.version_id, error = %e, "Failed to save model artifact");
        }
    }

    fn install(&self, model: Arc<dyn RiskModel>, artifact: ModelArtifact) {
        ENGINE_METRICS.set_active_model(
            &artifact.version_id,
            &artifact.model_type.to_string(),
            artifact.metric_summary.accuracy,
        );
        *self.active.write() = Some(Arc::new(ActiveModel { model, artifact }));
    }

    /// Recompute the forward window, swap it into the cache, snapshot it and
    /// emit one notification with the whole batch.
    pub async fn refresh_forward(&self, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let Some(_guard) = self.refresh_flag.try_acquire() else {
            debug!("Forward refresh already running, skipping trigger");
            return Ok(RefreshOutcome::Skipped);
        };

        let horizon = self.cache.config().forward_hours;
        let (records, model_version) = self.compute_window(now, horizon).await?;
        let count = self
            .cache
            .put_batch(records.clone(), self.cache.config().forward_ttl());
        ENGINE_METRICS.refresh_batch_size.set(count as f64);

        if let Err(e) = self.cache.snapshot_async().await {
            warn!(error = %e, "Failed to write prediction cache snapshot");
        }

        let notified = if records.is_empty() {
            false
        } else {
            match self.emitter.emit(&records).await {
                Ok(()) => true,
                Err(e) => {
                    error!(emitter = self.emitter.name(), error = %e, "Failed to publish prediction batch");
                    false
                }
            }
        };

        info!(
            records = count,
            model_version = %model_version,
            notified = notified,
            "🔄 Forward predictions refreshed"
        );

        Ok(RefreshOutcome::Completed {
            records: count,
            model_version,
            notified,
        })
    }

    /// Retrain when the latest validation accuracy is below `health_threshold`
    pub async fn health_check(&self) -> Result<HealthOutcome> {
        let accuracy = self
            .last_diagnostics
            .read()
            .as_ref()
            .and_then(|d| d.accuracy())
            .or_else(|| self.active_model().map(|a| a.artifact.metric_summary.accuracy));

        let Some(accuracy) = accuracy else {
            debug!("No validation metrics yet, skipping health check");
            return Ok(HealthOutcome::NoMetrics);
        };

        if accuracy >= self.config.health_threshold {
            debug!(accuracy = accuracy, "Model healthy");
            return Ok(HealthOutcome::Healthy { accuracy });
        }

        warn!(
            accuracy = accuracy,
            threshold = self.config.health_threshold,
            "Model accuracy below threshold, retraining"
        );
        let outcome = self.retrain().await?;
        Ok(HealthOutcome::Retrained { accuracy, outcome })
    }

    /// Activate the newest loadable artifact. Returns its version.
    pub fn restore_latest(&self) -> Option<String> {
        let artifact = self.artifacts.load_latest()?;
        match self.factory.restore(&artifact) {
            Ok(model) => {
                let version = artifact.version_id.clone();
                self.install(Arc::from(model), artifact);
                info!(model_version = %version, "Model restored from artifact");
                Some(version)
            }
            Err(e) => {
                warn!(model_version = %artifact.version_id, error = %e, "Failed to restore model artifact");
                None
            }
        }
    }

    /// Bring the service up: restore or train a model, then fill the cache
    pub async fn cold_start(&self, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        if self.active_model().is_none() && self.restore_latest().is_none() {
            info!("No usable model artifact, training from history");
            match self.retrain().await {
                Ok(RetrainOutcome::Trained { version, .. }) => {
                    info!(model_version = %version, "Cold start training succeeded")
                }
                Ok(_) => info!("Cold start training produced no model, serving heuristic predictions"),
                Err(e) => warn!(error = %e, "Cold start training failed, serving heuristic predictions"),
            }
        }

        self.refresh_forward(now).await
    }

    pub async fn model_insights(&self) -> Result<ModelInsights> {
        let active = self.active_model();
        let events = self.source.events(None).await?;
        let cold_start_stations = FeatureBuilder::new()
            .profiles(&events)
            .into_values()
            .filter(|p| p.is_cold_start(self.config.sequence_length))
            .map(|p| p.station)
            .collect();

        Ok(ModelInsights {
            status: if active.is_some() { "trained" } else { "heuristic" }.to_string(),
            model_type: active
                .as_ref()
                .map(|a| a.artifact.model_type.to_string())
                .unwrap_or_else(|| HEURISTIC_VERSION.to_string()),
            model_version: active.as_ref().map(|a| a.artifact.version_id.clone()),
            accuracy: active.as_ref().map(|a| a.artifact.metric_summary.accuracy),
            last_trained: active.as_ref().map(|a| a.artifact.trained_at),
            last_training: self.last_diagnostics(),
            cached_predictions: self.cache.len(),
            cold_start_stations,
            retrain_running: self.is_retraining(),
            refresh_running: self.is_refreshing(),
        })
    }
}
