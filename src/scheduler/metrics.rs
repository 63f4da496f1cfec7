//! Prometheus metrics for the retrain scheduler.
//!
//! Durations cover the whole job, so a weekly retrain observation includes the
//! forward refresh that follows it.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

pub struct SchedulerMetrics {
    pub jobs_total: Gauge,

    /// Executions by outcome: success, skipped or failure
    pub executions_total: CounterVec,

    pub execution_duration: HistogramVec,

    /// Triggers that found the job's run flag held
    pub overlap_skips: CounterVec,

    pub running_jobs: GaugeVec,

    /// Unix timestamp of the last finished execution
    pub last_execution: GaugeVec,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            jobs_total: register_gauge!(
                "transit_risk_scheduler_jobs",
                "Number of registered scheduler jobs"
            )
            .unwrap(),

            executions_total: register_counter_vec!(
                "transit_risk_scheduler_executions_total",
                "Job executions by outcome",
                &["job_name", "outcome"]
            )
            .unwrap(),

            execution_duration: register_histogram_vec!(
                "transit_risk_scheduler_execution_duration_seconds",
                "Job execution duration in seconds",
                &["job_name"],
                // Refreshes take milliseconds, retrains up to the training budget
                vec![0.01, 0.05, 0.25, 1.0, 5.0, 30.0, 120.0, 300.0, 600.0, 1200.0]
            )
            .unwrap(),

            overlap_skips: register_counter_vec!(
                "transit_risk_scheduler_overlap_skips_total",
                "Job triggers skipped because a run was already in progress",
                &["job_name"]
            )
            .unwrap(),

            running_jobs: register_gauge_vec!(
                "transit_risk_scheduler_running_jobs",
                "Number of currently running jobs",
                &["job_name"]
            )
            .unwrap(),

            last_execution: register_gauge_vec!(
                "transit_risk_scheduler_last_execution_timestamp",
                "Unix timestamp of last job execution",
                &["job_name"]
            )
            .unwrap(),
        }
    }

    pub fn record_execution_start(&self, job_name: &str) {
        self.running_jobs.with_label_values(&[job_name]).inc();
    }

    pub fn record_execution_complete(&self, job_name: &str, outcome: &str, duration_secs: f64) {
        self.running_jobs.with_label_values(&[job_name]).dec();

        self.executions_total
            .with_label_values(&[job_name, outcome])
            .inc();
        if outcome == "skipped" {
            self.overlap_skips.with_label_values(&[job_name]).inc();
        }

        self.execution_duration
            .with_label_values(&[job_name])
            .observe(duration_secs);

        self.last_execution
            .with_label_values(&[job_name])
            .set(chrono::Utc::now().timestamp() as f64);
    }

    pub fn update_job_count(&self, count: f64) {
        self.jobs_total.set(count);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref SCHEDULER_METRICS: SchedulerMetrics = SchedulerMetrics::new();
}

/// Register the scheduler metrics so they show up before the first job runs
pub fn init_scheduler_metrics() {
    lazy_static::initialize(&SCHEDULER_METRICS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_run_counts_as_overlap() {
        let job = "metrics_test_job";
        let before = SCHEDULER_METRICS.overlap_skips.with_label_values(&[job]).get();

        SCHEDULER_METRICS.record_execution_start(job);
        SCHEDULER_METRICS.record_execution_complete(job, "skipped", 0.002);
        SCHEDULER_METRICS.record_execution_start(job);
        SCHEDULER_METRICS.record_execution_complete(job, "success", 0.3);

        assert_eq!(
            SCHEDULER_METRICS.overlap_skips.with_label_values(&[job]).get(),
            before + 1.0
        );
        assert_eq!(SCHEDULER_METRICS.running_jobs.with_label_values(&[job]).get(), 0.0);
        assert!(SCHEDULER_METRICS.last_execution.with_label_values(&[job]).get() > 0.0);
    }
}
