use chrono::{DateTime, Utc};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static VERSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// ML model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MLConfig {
    /// Number of consecutive hourly records per training window
    pub sequence_length: usize,

    /// Minimum number of windows required to attempt training
    pub min_sequences: usize,

    /// Fraction of the newest windows held out for validation
    pub validation_split: f64,

    /// L2 regularization strength
    pub l2_alpha: f64,

    /// Wall-clock budget for one training run (milliseconds)
    pub training_timeout_ms: u64,

    /// Directory holding versioned model artifacts
    pub model_dir: PathBuf,

    /// Number of artifact versions kept on disk
    pub keep_versions: usize,

    /// Validation accuracy below which the health check forces a retrain
    pub health_threshold: f64,

    /// Seed for the heuristic model's incident-type draw
    pub heuristic_seed: u64,
}

impl MLConfig {
    pub fn training_timeout(&self) -> Duration {
        Duration::from_millis(self.training_timeout_ms)
    }
}

impl Default for MLConfig {
    fn default() -> Self {
        Self {
            sequence_length: 24,
            min_sequences: 10,
            validation_split: 0.2,
            l2_alpha: 0.1,
            training_timeout_ms: 600_000,
            model_dir: PathBuf::from("data/models"),
            keep_versions: 5,
            health_threshold: 0.6,
            heuristic_seed: 42,
        }
    }
}

/// Model type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    SequenceLogistic,
    Heuristic,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::SequenceLogistic => write!(f, "Sequence Logistic Regression"),
            ModelType::Heuristic => write!(f, "Heuristic Fallback"),
        }
    }
}

/// Model evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelMetrics {
    /// Validation accuracy
    pub accuracy: f64,

    /// Precision of the positive class
    pub precision: f64,

    /// Recall of the positive class
    pub recall: f64,

    /// F1 score
    pub f1_score: f64,

    /// Accuracy on the training split
    pub train_accuracy: f64,

    /// Fraction of positive labels in the training split
    pub positive_rate: f64,

    pub n_train: usize,
    pub n_validation: usize,
}

impl ModelMetrics {
    /// Binary classification metrics for the positive class
    pub fn binary(y_true: &[bool], y_pred: &[bool]) -> (f64, f64, f64, f64) {
        let n = y_true.len();
        if n == 0 {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_count = 0usize;
        let mut correct = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            if t == p {
                correct += 1;
            }
            match (t, p) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_count += 1,
                _ => {}
            }
        }

        let accuracy = correct as f64 / n as f64;
        let precision = if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        };
        let recall = if tp + fn_count > 0 {
            tp as f64 / (tp + fn_count) as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        (accuracy, precision, recall, f1)
    }
}

/// A trained model as persisted and swapped by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version_id: String,
    pub model_type: ModelType,
    pub trained_at: DateTime<Utc>,
    pub metric_summary: ModelMetrics,
    /// Model-specific parameters, opaque outside the model implementation
    pub state: serde_json::Value,
}

impl ModelArtifact {
    /// Version ids sort in training order: `20240304T230000123456Z-00000007`.
    /// The counter orders ids minted within the same microsecond.
    pub fn new_version_id(at: DateTime<Utc>) -> String {
        let seq = VERSION_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:08}", at.format("%Y%m%dT%H%M%S%6fZ"), seq % 100_000_000)
    }
}

/// Outcome category of a training run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Succeeded,
    InsufficientData,
    Failed,
    TimedOut,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Succeeded => "succeeded",
            TrainingStatus::InsufficientData => "insufficient_data",
            TrainingStatus::Failed => "failed",
            TrainingStatus::TimedOut => "timed_out",
        }
    }
}

/// What happened during a training run; returned alongside the artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingDiagnostics {
    pub status: TrainingStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub n_sequences: usize,
    pub metrics: Option<ModelMetrics>,
    pub error: Option<String>,
}

impl TrainingDiagnostics {
    pub fn started(n_sequences: usize) -> Self {
        Self {
            status: TrainingStatus::Failed,
            started_at: Utc::now(),
            duration_ms: 0,
            n_sequences,
            metrics: None,
            error: None,
        }
    }

    pub fn succeed(mut self, metrics: ModelMetrics) -> Self {
        self.status = TrainingStatus::Succeeded;
        self.metrics = Some(metrics);
        self.error = None;
        self.finish()
    }

    pub fn fail(mut self, status: TrainingStatus, error: impl Into<String>) -> Self {
        self.status = status;
        self.error = Some(error.into());
        self.finish()
    }

    fn finish(mut self) -> Self {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TrainingStatus::Succeeded
    }

    /// Validation accuracy, when training produced metrics
    pub fn accuracy(&self) -> Option<f64> {
        self.metrics.as_ref().map(|m| m.accuracy)
    }
}

/// Training dataset
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Binary labels
    pub labels: Vec<bool>,

    /// Number of samples
    pub n_samples: usize,

    /// Number of features
    pub n_features: usize,
}

impl TrainingDataset {
    /// Create a dataset from row vectors, which must share one length
    pub fn from_rows(rows: &[Vec<f64>], labels: Vec<bool>) -> Self {
        let n_samples = rows.len();
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);

        let mut features = Array2::zeros((n_samples, n_features));
        for (i, row) in rows.iter().enumerate() {
            for (j, &val) in row.iter().enumerate().take(n_features) {
                features[[i, j]] = val;
            }
        }

        Self {
            features,
            labels,
            n_samples,
            n_features,
        }
    }

    /// Split off the newest `validation_size` fraction. Rows must already be
    /// in chronological order; nothing is shuffled.
    pub fn chronological_split(&self, validation_size: f64) -> (TrainingDataset, TrainingDataset) {
        let mut n_val = (self.n_samples as f64 * validation_size).round() as usize;
        if self.n_samples > 1 {
            n_val = n_val.clamp(1, self.n_samples - 1);
        } else {
            n_val = 0;
        }
        let n_train = self.n_samples - n_val;

        let train = TrainingDataset {
            features: self.features.slice(s![..n_train, ..]).to_owned(),
            labels: self.labels[..n_train].to_vec(),
            n_samples: n_train,
            n_features: self.n_features,
        };
        let validation = TrainingDataset {
            features: self.features.slice(s![n_train.., ..]).to_owned(),
            labels: self.labels[n_train..].to_vec(),
            n_samples: n_val,
            n_features: self.n_features,
        };

        (train, validation)
    }

    pub fn has_both_classes(&self) -> bool {
        self.labels.iter().any(|&l| l) && self.labels.iter().any(|&l| !l)
    }

    pub fn positive_rate(&self) -> f64 {
        if self.n_samples == 0 {
            return 0.0;
        }
        self.labels.iter().filter(|&&l| l).count() as f64 / self.n_samples as f64
    }

    /// Column means and standard deviations; zero deviations are replaced by 1
    pub fn standardization(&self) -> (Array1<f64>, Array1<f64>) {
        let means = self
            .features
            .mean_axis(ndarray::Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.n_features));
        let stds = self
            .features
            .std_axis(ndarray::Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > 1e-12 { s } else { 1.0 });
        (means, stds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> TrainingDataset {
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, 1.0]).collect();
        let labels = (0..n).map(|i| i % 2 == 0).collect();
        TrainingDataset::from_rows(&rows, labels)
    }

    #[test]
    fn test_chronological_split_keeps_order() {
        let (train, val) = dataset(10).chronological_split(0.2);
        assert_eq!(train.n_samples, 8);
        assert_eq!(val.n_samples, 2);
        assert_eq!(train.features[[7, 0]], 7.0);
        assert_eq!(val.features[[0, 0]], 8.0);
    }

    #[test]
    fn test_split_keeps_at_least_one_validation_row() {
        let (train, val) = dataset(3).chronological_split(0.1);
        assert_eq!(train.n_samples, 2);
        assert_eq!(val.n_samples, 1);
    }

    #[test]
    fn test_standardization_handles_constant_columns() {
        let (means, stds) = dataset(4).standardization();
        assert_eq!(means[0], 1.5);
        assert_eq!(means[1], 1.0);
        assert_eq!(stds[1], 1.0);
    }

    #[test]
    fn test_binary_metrics() {
        let y_true = [true, true, false, false];
        let y_pred = [true, false, true, false];
        let (accuracy, precision, recall, f1) = ModelMetrics::binary(&y_true, &y_pred);
        assert_eq!(accuracy, 0.5);
        assert_eq!(precision, 0.5);
        assert_eq!(recall, 0.5);
        assert_eq!(f1, 0.5);
    }

    #[test]
    fn test_version_ids_sort_by_time() {
        let earlier = ModelArtifact::new_version_id(
            DateTime::parse_from_rfc3339("2024-03-03T23:00:00Z").unwrap().into(),
        );
        let later = ModelArtifact::new_version_id(
            DateTime::parse_from_rfc3339("2024-03-10T23:00:00Z").unwrap().into(),
        );
        assert!(earlier < later);
        assert!(earlier.starts_with("20240303T230000000000Z-"));
    }

    #[test]
    fn test_version_ids_minted_in_the_same_instant_keep_their_order() {
        let at: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-03-10T23:00:00.250Z")
            .unwrap()
            .into();
        let ids: Vec<String> = (0..50).map(|_| ModelArtifact::new_version_id(at)).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
        assert!(ids[0].starts_with("20240310T230000250000Z-"));
    }

    #[test]
    fn test_diagnostics_lifecycle() {
        let diag = TrainingDiagnostics::started(0)
            .fail(TrainingStatus::InsufficientData, "no sequences");
        assert!(!diag.is_success());
        assert_eq!(diag.accuracy(), None);

        let diag = TrainingDiagnostics::started(12).succeed(ModelMetrics {
            accuracy: 0.75,
            ..Default::default()
        });
        assert!(diag.is_success());
        assert_eq!(diag.accuracy(), Some(0.75));
    }
}
