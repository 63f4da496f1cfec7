use crate::error::{AppError, Result};
use crate::ml::features::{is_peak_hour, is_weekend_day, FeatureRecord};
use crate::ml::models::{
    MLConfig, ModelArtifact, ModelMetrics, ModelType, TrainingDataset, TrainingDiagnostics,
    TrainingStatus,
};
use crate::ml::sequence::Sequence;
use crate::models::{IncidentType, RiskEstimate};
use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use std::collections::BTreeMap;

/// A model that scores (station, hour) pairs.
///
/// Both operations are soft: `train` reports failures through its diagnostics
/// and `predict` answers `None` when it has nothing sensible to say, which
/// callers treat as "ask the fallback", never as zero risk.
pub trait RiskModel: Send + Sync {
    /// Fit on chronologically ordered sequences
    fn train(&mut self, sequences: &[Sequence]) -> (Option<ModelArtifact>, TrainingDiagnostics);

    /// Score the hour bucket starting at `at` for `station`
    fn predict(&self, station: &str, at: DateTime<Utc>) -> Option<RiskEstimate>;
}

/// Creates fresh models for training and rebuilds persisted ones
pub trait ModelFactory: Send + Sync {
    fn create(&self) -> Box<dyn RiskModel>;

    fn restore(&self, artifact: &ModelArtifact) -> Result<Box<dyn RiskModel>>;
}

/// Number of values in a window feature vector
pub const N_FEATURES: usize = 9;

/// Compact description of one feature window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSummary {
    pub mean_count: f64,
    pub last_count: f64,
    pub max_count: f64,
    pub peak_fraction: f64,
    pub weekend_fraction: f64,
    pub last_bucket: DateTime<Utc>,
}

impl WindowSummary {
    pub fn from_records(records: &[FeatureRecord]) -> Option<Self> {
        let last = records.last()?;
        let n = records.len() as f64;
        let counts = records.iter().map(|r| r.incident_count_in_bucket as f64);

        Some(Self {
            mean_count: counts.clone().sum::<f64>() / n,
            last_count: last.incident_count_in_bucket as f64,
            max_count: counts.fold(0.0, f64::max),
            peak_fraction: records.iter().filter(|r| r.is_peak_hour).count() as f64 / n,
            weekend_fraction: records.iter().filter(|r| r.is_weekend).count() as f64 / n,
            last_bucket: last.bucket_start,
        })
    }

    /// Window statistics followed by calendar features of the target hour
    pub fn feature_vector(&self, target: DateTime<Utc>) -> Vec<f64> {
        let hour = target.hour();
        let angle = 2.0 * std::f64::consts::PI * hour as f64 / 24.0;
        let day = target.weekday().num_days_from_monday();

        vec![
            self.mean_count,
            self.last_count,
            self.max_count,
            self.peak_fraction,
            self.weekend_fraction,
            angle.sin(),
            angle.cos(),
            if is_peak_hour(hour) { 1.0 } else { 0.0 },
            if is_weekend_day(day) { 1.0 } else { 0.0 },
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SequenceModelState {
    feature_means: Array1<f64>,
    feature_stds: Array1<f64>,
    weights: Array1<f64>,
    bias: f64,
    /// 24 rows of per-type counts
    hour_type_counts: Vec<Vec<f64>>,
    station_type_counts: BTreeMap<String, Vec<f64>>,
    /// Newest window seen for each station
    contexts: BTreeMap<String, WindowSummary>,
}

impl SequenceModelState {
    fn validate(&self) -> Result<()> {
        let dims_ok = self.weights.len() == N_FEATURES
            && self.feature_means.len() == N_FEATURES
            && self.feature_stds.len() == N_FEATURES
            && self.hour_type_counts.len() == 24
            && self
                .hour_type_counts
                .iter()
                .all(|row| row.len() == IncidentType::COUNT)
            && self
                .station_type_counts
                .values()
                .all(|row| row.len() == IncidentType::COUNT);
        if !dims_ok {
            return Err(AppError::Serialization(
                "sequence model state has unexpected dimensions".to_string(),
            ));
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(AppError::Serialization(
                "sequence model state holds non-finite weights".to_string(),
            ));
        }
        Ok(())
    }

    fn probability(&self, features: &[f64]) -> f64 {
        let z: f64 = features
            .iter()
            .enumerate()
            .map(|(j, x)| (x - self.feature_means[j]) / self.feature_stds[j] * self.weights[j])
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    /// Laplace-smoothed P(type | hour) * P(type | station); ties go to the lower index
    fn likely_type(&self, station: &str, hour: u32) -> IncidentType {
        let hour_row = &self.hour_type_counts[(hour % 24) as usize];
        let hour_total: f64 = hour_row.iter().sum();
        let station_row = self.station_type_counts.get(station);
        let station_total: f64 = station_row.map(|r| r.iter().sum()).unwrap_or(0.0);
        let k = IncidentType::COUNT as f64;

        let mut best = (0usize, f64::MIN);
        for t in 0..IncidentType::COUNT {
            let p_hour = (hour_row[t] + 1.0) / (hour_total + k);
            let p_station = (station_row.map(|r| r[t]).unwrap_or(0.0) + 1.0) / (station_total + k);
            let score = p_hour * p_station;
            if score > best.1 {
                best = (t, score);
            }
        }
        IncidentType::from_index(best.0).unwrap_or(IncidentType::Theft)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Logistic regression over summarized feature windows, with a smoothed
/// incident-type distribution per hour and per station
pub struct TrainedSequenceModel {
    config: MLConfig,
    state: Option<SequenceModelState>,
}

impl TrainedSequenceModel {
    pub fn new(config: MLConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Rebuild a model from a persisted artifact
    pub fn from_artifact(config: MLConfig, artifact: &ModelArtifact) -> Result<Self> {
        if artifact.model_type != ModelType::SequenceLogistic {
            return Err(AppError::Validation(format!(
                "artifact {} holds a {} model",
                artifact.version_id, artifact.model_type
            )));
        }
        let state: SequenceModelState = serde_json::from_value(artifact.state.clone())?;
        state.validate()?;

        Ok(Self {
            config,
            state: Some(state),
        })
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    /// Stations the model has context for
    pub fn known_stations(&self) -> Vec<String> {
        self.state
            .as_ref()
            .map(|s| s.contexts.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
        let shape = arr.shape();
        let data: Vec<f64> = arr.iter().copied().collect();
        DenseMatrix::new(shape[0], shape[1], data, false)
    }

    fn standardize(features: &Array2<f64>, means: &Array1<f64>, stds: &Array1<f64>) -> Array2<f64> {
        let mut out = features.clone();
        for mut row in out.rows_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (*value - means[j]) / stds[j];
            }
        }
        out
    }

    fn fit(&self, sequences: &[Sequence]) -> Result<(SequenceModelState, ModelMetrics)> {
        let mut rows = Vec::with_capacity(sequences.len());
        let mut labels = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            let summary = WindowSummary::from_records(&sequence.records).ok_or_else(|| {
                AppError::TrainingFailure(format!("empty window for station {}", sequence.station))
            })?;
            rows.push(summary.feature_vector(sequence.target_bucket));
            labels.push(sequence.label);
        }

        let dataset = TrainingDataset::from_rows(&rows, labels);
        let (train, validation) = dataset.chronological_split(self.config.validation_split);
        if !train.has_both_classes() {
            return Err(AppError::DataInsufficient(format!(
                "training split of {} windows holds a single label",
                train.n_samples
            )));
        }

        let (means, stds) = train.standardization();
        let x_train = Self::standardize(&train.features, &means, &stds);
        let x = Self::ndarray_to_densematrix(&x_train);
        let y: Vec<i32> = train.labels.iter().map(|&l| l as i32).collect();

        let params = LogisticRegressionParameters::default().with_alpha(self.config.l2_alpha);
        let model: LogisticRegression<f64, i32, DenseMatrix<f64>, Vec<i32>> =
            LogisticRegression::fit(&x, &y, params).map_err(|e| {
                AppError::TrainingFailure(format!("Failed to train logistic regression: {}", e))
            })?;

        // Binary problems yield a single weight row (or column)
        let coefficients = model.coefficients();
        let weights = match coefficients.shape() {
            (1, n) if n == N_FEATURES => {
                Array1::from_iter((0..N_FEATURES).map(|j| *coefficients.get((0, j))))
            }
            (n, 1) if n == N_FEATURES => {
                Array1::from_iter((0..N_FEATURES).map(|j| *coefficients.get((j, 0))))
            }
            (n_rows, n_cols) => {
                return Err(AppError::TrainingFailure(format!(
                    "unexpected coefficient shape {}x{}",
                    n_rows, n_cols
                )))
            }
        };
        let bias = *model.intercept().get((0, 0));
        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(AppError::TrainingFailure(
                "solver diverged to non-finite weights".to_string(),
            ));
        }

        let mut state = SequenceModelState {
            feature_means: means,
            feature_stds: stds,
            weights,
            bias,
            hour_type_counts: vec![vec![0.0; IncidentType::COUNT]; 24],
            station_type_counts: BTreeMap::new(),
            contexts: BTreeMap::new(),
        };
        Self::accumulate_types(&mut state, sequences);

        let metrics = Self::evaluate(&state, &train, &validation);
        Ok((state, metrics))
    }

    fn accumulate_types(state: &mut SequenceModelState, sequences: &[Sequence]) {
        // Windows overlap, so count each (station, bucket) record once
        let mut seen = std::collections::HashSet::new();
        for sequence in sequences {
            for record in &sequence.records {
                if !seen.insert((record.station.clone(), record.bucket_start)) {
                    continue;
                }
                let weight = record.incident_count_in_bucket as f64;
                let t = record.incident_type_encoded.min(IncidentType::COUNT - 1);
                state.hour_type_counts[(record.hour % 24) as usize][t] += weight;
                state
                    .station_type_counts
                    .entry(record.station.clone())
                    .or_insert_with(|| vec![0.0; IncidentType::COUNT])[t] += weight;
            }

            // Sequences arrive ordered by target bucket, so the last one wins
            if let Some(summary) = WindowSummary::from_records(&sequence.records) {
                state.contexts.insert(sequence.station.clone(), summary);
            }
        }
    }

    fn evaluate(
        state: &SequenceModelState,
        train: &TrainingDataset,
        validation: &TrainingDataset,
    ) -> ModelMetrics {
        let predict_all = |data: &TrainingDataset| -> Vec<bool> {
            data.features
                .rows()
                .into_iter()
                .map(|row| state.probability(&row.to_vec()) >= 0.5)
                .collect()
        };

        let train_pred = predict_all(train);
        let (train_accuracy, _, _, _) = ModelMetrics::binary(&train.labels, &train_pred);

        // Fall back to training figures when there is nothing held out
        let (accuracy, precision, recall, f1_score) = if validation.n_samples > 0 {
            let val_pred = predict_all(validation);
            ModelMetrics::binary(&validation.labels, &val_pred)
        } else {
            ModelMetrics::binary(&train.labels, &train_pred)
        };

        ModelMetrics {
            accuracy,
            precision,
            recall,
            f1_score,
            train_accuracy,
            positive_rate: train.positive_rate(),
            n_train: train.n_samples,
            n_validation: validation.n_samples,
        }
    }
}

impl RiskModel for TrainedSequenceModel {
    fn train(&mut self, sequences: &[Sequence]) -> (Option<ModelArtifact>, TrainingDiagnostics) {
        let diagnostics = TrainingDiagnostics::started(sequences.len());
        let required = self.config.min_sequences.max(2);
        if sequences.len() < required {
            return (
                None,
                diagnostics.fail(
                    TrainingStatus::InsufficientData,
                    format!("{} sequences available, {} required", sequences.len(), required),
                ),
            );
        }

        let (state, metrics) = match self.fit(sequences) {
            Ok(fitted) => fitted,
            Err(AppError::DataInsufficient(msg)) => {
                return (None, diagnostics.fail(TrainingStatus::InsufficientData, msg))
            }
            Err(e) => return (None, diagnostics.fail(TrainingStatus::Failed, e.to_string())),
        };

        let payload = match serde_json::to_value(&state) {
            Ok(payload) => payload,
            Err(e) => {
                return (
                    None,
                    diagnostics.fail(
                        TrainingStatus::Failed,
                        format!("Failed to serialize model state: {}", e),
                    ),
                )
            }
        };

        let trained_at = Utc::now();
        let artifact = ModelArtifact {
            version_id: ModelArtifact::new_version_id(trained_at),
            model_type: ModelType::SequenceLogistic,
            trained_at,
            metric_summary: metrics.clone(),
            state: payload,
        };
        self.state = Some(state);

        (Some(artifact), diagnostics.succeed(metrics))
    }

    fn predict(&self, station: &str, at: DateTime<Utc>) -> Option<RiskEstimate> {
        let state = self.state.as_ref()?;
        let context = state.contexts.get(station)?;

        let probability = state.probability(&context.feature_vector(at));
        if !probability.is_finite() {
            return None;
        }

        Some(RiskEstimate::new(
            probability,
            state.likely_type(station, at.hour()),
        ))
    }
}

/// Factory for [`TrainedSequenceModel`]
#[derive(Debug, Clone)]
pub struct SequenceModelFactory {
    config: MLConfig,
}

impl SequenceModelFactory {
    pub fn new(config: MLConfig) -> Self {
        Self { config }
    }
}

impl ModelFactory for SequenceModelFactory {
    fn create(&self) -> Box<dyn RiskModel> {
        Box::new(TrainedSequenceModel::new(self.config.clone()))
    }

    fn restore(&self, artifact: &ModelArtifact) -> Result<Box<dyn RiskModel>> {
        Ok(Box::new(TrainedSequenceModel::from_artifact(
            self.config.clone(),
            artifact,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FeatureBuilder;
    use crate::ml::sequence::SequenceEncoder;
    use crate::models::IncidentEvent;
    use chrono::{Duration, TimeZone};

    /// Runs of 30 busy hours separated by two quiet hours
    fn bursty_sequences(station: &str, runs: i64) -> Vec<Sequence> {
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let mut events = Vec::new();
        for run in 0..runs {
            for h in 0..30 {
                let hour = run * 32 + h;
                let incident_type = if h % 3 == 0 {
                    IncidentType::Pickpocketing
                } else {
                    IncidentType::Theft
                };
                events.push(IncidentEvent::new(
                    incident_type,
                    base + Duration::hours(hour) + Duration::minutes(5),
                    station,
                    4.6,
                    -74.1,
                ));
            }
        }
        // One trailing incident so the last run's outcome is observable
        events.push(IncidentEvent::new(
            IncidentType::Theft,
            base + Duration::hours(runs * 32 + 1),
            station,
            4.6,
            -74.1,
        ));
        let features = FeatureBuilder::new().build(&events).unwrap();
        SequenceEncoder::new(24).encode(&features)
    }

    #[test]
    fn test_insufficient_sequences() {
        let mut model = TrainedSequenceModel::new(MLConfig::default());
        let (artifact, diagnostics) = model.train(&[]);
        assert!(artifact.is_none());
        assert_eq!(diagnostics.status, TrainingStatus::InsufficientData);
        assert!(diagnostics.error.is_some());
        assert!(!model.is_trained());
    }

    #[test]
    fn test_single_class_is_soft_failure() {
        // One long run never produces a quiet follow-up hour inside the horizon
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let events: Vec<IncidentEvent> = (0..60)
            .map(|h| {
                IncidentEvent::new(
                    IncidentType::Theft,
                    base + Duration::hours(h),
                    "Calle 45",
                    4.63,
                    -74.07,
                )
            })
            .collect();
        let features = FeatureBuilder::new().build(&events).unwrap();
        let sequences = SequenceEncoder::new(24).encode(&features);
        assert!(sequences.iter().all(|s| s.label));

        let mut model = TrainedSequenceModel::new(MLConfig::default());
        let (artifact, diagnostics) = model.train(&sequences);
        assert!(artifact.is_none());
        assert_eq!(diagnostics.status, TrainingStatus::InsufficientData);
    }

    #[test]
    fn test_train_predict_and_restore() {
        let sequences = bursty_sequences("Calle 45", 6);
        assert!(sequences.iter().any(|s| s.label));
        assert!(sequences.iter().any(|s| !s.label));

        let mut model = TrainedSequenceModel::new(MLConfig::default());
        let (artifact, diagnostics) = model.train(&sequences);
        assert!(diagnostics.is_success(), "{:?}", diagnostics.error);
        let artifact = artifact.expect("artifact");
        assert_eq!(artifact.model_type, ModelType::SequenceLogistic);
        assert_eq!(diagnostics.n_sequences, sequences.len());

        let at = Utc.with_ymd_and_hms(2024, 3, 20, 8, 0, 0).unwrap();
        let estimate = model.predict("Calle 45", at).expect("known station");
        assert!(estimate.is_valid());
        assert!(model.predict("Portal Sur", at).is_none());

        let restored = TrainedSequenceModel::from_artifact(MLConfig::default(), &artifact).unwrap();
        assert_eq!(restored.predict("Calle 45", at), Some(estimate));
    }

    #[test]
    fn test_restore_rejects_tampered_state() {
        let sequences = bursty_sequences("Calle 45", 6);
        let mut model = TrainedSequenceModel::new(MLConfig::default());
        let (artifact, _) = model.train(&sequences);
        let mut artifact = artifact.expect("artifact");
        artifact.state["hour_type_counts"] = serde_json::json!([]);

        assert!(TrainedSequenceModel::from_artifact(MLConfig::default(), &artifact).is_err());
    }

    #[test]
    fn test_window_summary() {
        let sequences = bursty_sequences("Calle 45", 2);
        let summary = WindowSummary::from_records(&sequences[0].records).unwrap();
        assert_eq!(summary.mean_count, 1.0);
        assert_eq!(summary.max_count, 1.0);
        assert_eq!(summary.feature_vector(sequences[0].target_bucket).len(), N_FEATURES);
        assert!(WindowSummary::from_records(&[]).is_none());
    }
}
