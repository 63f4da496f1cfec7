//! Prometheus metrics for the prediction engine.
//!
//! Everything registers in the default registry, so [`render`] also exports
//! the scheduler metrics.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram, CounterVec,
    Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};

/// Engine metrics collection
pub struct EngineMetrics {
    /// Cache reads by result (fresh, stale, miss)
    pub cache_lookups: CounterVec,

    /// Entries in the current batch generation
    pub cached_predictions: Gauge,

    /// Predictions served by source (model, heuristic)
    pub predictions_served: CounterVec,

    /// Retrain runs by outcome
    pub retrain_outcomes: CounterVec,

    /// Wall-clock duration of training runs in seconds
    pub training_duration: Histogram,

    /// Validation accuracy of the active model
    pub model_accuracy: Gauge,

    /// Active model, labelled by version and type (value is always 1)
    pub active_model: GaugeVec,

    /// Records written by the last forward refresh
    pub refresh_batch_size: Gauge,

    /// Notification deliveries by emitter and outcome
    pub notifications: CounterVec,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            cache_lookups: register_counter_vec!(
                "transit_risk_cache_lookups_total",
                "Prediction cache lookups",
                &["result"]
            )
            .unwrap(),

            cached_predictions: register_gauge!(
                "transit_risk_cached_predictions",
                "Entries in the current forward prediction batch"
            )
            .unwrap(),

            predictions_served: register_counter_vec!(
                "transit_risk_predictions_served_total",
                "Predictions computed on demand",
                &["source"]
            )
            .unwrap(),

            retrain_outcomes: register_counter_vec!(
                "transit_risk_retrain_total",
                "Retrain runs by outcome",
                &["outcome"]
            )
            .unwrap(),

            training_duration: register_histogram!(
                "transit_risk_training_duration_seconds",
                "Training run duration in seconds",
                vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]
            )
            .unwrap(),

            model_accuracy: register_gauge!(
                "transit_risk_model_accuracy",
                "Validation accuracy of the active model"
            )
            .unwrap(),

            active_model: register_gauge_vec!(
                "transit_risk_active_model_info",
                "Active risk model",
                &["model_version", "model_type"]
            )
            .unwrap(),

            refresh_batch_size: register_gauge!(
                "transit_risk_refresh_batch_size",
                "Records written by the last forward refresh"
            )
            .unwrap(),

            notifications: register_counter_vec!(
                "transit_risk_notifications_total",
                "Prediction batch notifications",
                &["emitter", "outcome"]
            )
            .unwrap(),
        }
    }

    pub fn record_cache_lookup(&self, result: &str) {
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_retrain(&self, outcome: &str, duration_secs: Option<f64>) {
        self.retrain_outcomes.with_label_values(&[outcome]).inc();
        if let Some(secs) = duration_secs {
            self.training_duration.observe(secs);
        }
    }

    /// Point the active model gauge at a new version
    pub fn set_active_model(&self, version: &str, model_type: &str, accuracy: f64) {
        self.active_model.reset();
        self.active_model
            .with_label_values(&[version, model_type])
            .set(1.0);
        self.model_accuracy.set(accuracy);
    }

    pub fn record_notification(&self, emitter: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.notifications
            .with_label_values(&[emitter, outcome])
            .inc();
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global engine metrics instance
    pub static ref ENGINE_METRICS: EngineMetrics = EngineMetrics::new();
}

/// Prometheus text exposition of every registered metric
pub fn render() -> String {
    lazy_static::initialize(&ENGINE_METRICS);
    crate::scheduler::init_scheduler_metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
