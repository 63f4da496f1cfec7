/// Risk prediction pipeline
///
/// This module provides:
/// - Hourly feature records built from the incident log
/// - Fixed-length training sequences per station
/// - A trainable sequence model and a deterministic heuristic fallback
/// - Versioned model artifacts on disk
/// - The prediction service tying models, cache and notifications together

pub mod classifier;
pub mod features;
pub mod heuristic;
pub mod models;
pub mod registry;
pub mod sequence;
pub mod service;

pub use classifier::{ModelFactory, RiskModel, SequenceModelFactory, TrainedSequenceModel};
pub use features::{FeatureBuilder, FeatureRecord};
pub use heuristic::HeuristicFallbackModel;
pub use models::{
    MLConfig, ModelArtifact, ModelMetrics, ModelType, TrainingDataset, TrainingDiagnostics,
    TrainingStatus,
};
pub use registry::ArtifactStore;
pub use sequence::{Sequence, SequenceEncoder};
pub use service::{
    ActiveModel, HealthOutcome, ModelInsights, PredictionService, RefreshOutcome,
    RetrainOutcome, HEURISTIC_VERSION,
};
