//! Core scheduler service implementation

use super::{
    config::{JobConfig, SchedulerConfig},
    error::{SchedulerError, SchedulerResult},
    jobs::{Job, JobContext, JobId, JobMetadata, JobOutcome, JobStatus},
    metrics::SCHEDULER_METRICS,
    tasks,
};
use crate::ml::{PredictionService, RefreshOutcome};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{JobScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};

/// Drives retraining, forward refreshes and health checks for one
/// [`PredictionService`]
pub struct RetrainScheduler {
    /// Configuration
    config: SchedulerConfig,

    /// Service the jobs operate on
    service: Arc<PredictionService>,

    /// Underlying tokio-cron-scheduler instance
    scheduler: JobScheduler,

    /// Registered jobs
    jobs: Arc<DashMap<JobId, Arc<Job>>>,

    /// Whether the scheduler is running
    running: Arc<tokio::sync::RwLock<bool>>,

    /// Task consuming refresh requests from stale cache reads
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RetrainScheduler {
    /// Create a new scheduler
    pub async fn new(config: SchedulerConfig, service: Arc<PredictionService>) -> SchedulerResult<Self> {
        info!("Initializing retrain scheduler");

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::StartupFailed(e.to_string()))?;

        Ok(Self {
            config,
            service,
            scheduler,
            jobs: Arc::new(DashMap::new()),
            running: Arc::new(tokio::sync::RwLock::new(false)),
            listener: Mutex::new(None),
        })
    }

    pub fn service(&self) -> &Arc<PredictionService> {
        &self.service
    }

    /// Cold start the service, then register and start the cron jobs
    pub async fn start(&mut self) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Scheduler is already running");
                return Ok(());
            }
            *running = true;
        }

        info!("🚀 Starting retrain scheduler");

        match self.service.cold_start(Utc::now()).await {
            Ok(outcome) => debug!(outcome = ?outcome, "Cold start finished"),
            Err(e) => error!(error = %e, "Cold start refresh failed"),
        }

        if !self.config.enabled {
            info!("Scheduled jobs are disabled in configuration");
        } else {
            self.register_default_jobs().await?;
            self.scheduler.start().await?;
        }

        if self.config.revalidation_enabled {
            *self.listener.lock() = self.spawn_revalidation_listener();
        }

        info!(jobs = self.jobs.len(), "Retrain scheduler started");
        Ok(())
    }

    /// Stop the scheduler
    pub async fn shutdown(&mut self) -> SchedulerResult<()> {
        info!("Shutting down retrain scheduler");

        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Scheduler is not running");
                return Ok(());
            }
            *running = false;
        }

        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }

        if self.config.enabled {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::ShutdownFailed(e.to_string()))?;
        }

        info!("Retrain scheduler shut down successfully");
        Ok(())
    }

    async fn register_default_jobs(&self) -> SchedulerResult<()> {
        let jobs = &self.config.jobs;
        self.register("weekly_retrain", "Full model retrain", &jobs.weekly_retrain, tasks::weekly_retrain)
            .await?;
        self.register("forward_refresh", "Forward prediction refresh", &jobs.forward_refresh, tasks::forward_refresh)
            .await?;
        self.register("health_check", "Model accuracy check", &jobs.health_check, tasks::health_check)
            .await?;
        Ok(())
    }

    async fn register<F, Fut>(
        &self,
        name: &str,
        description: &str,
        job_config: &JobConfig,
        task: F,
    ) -> SchedulerResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SchedulerResult<JobOutcome>> + Send + 'static,
    {
        if !job_config.enabled {
            info!(job_name = name, "Job disabled in configuration");
            return Ok(());
        }

        let metadata = JobMetadata::new(name, job_config.schedule.clone()).with_description(description);
        self.add_job(Job::new(metadata, task)).await?;
        Ok(())
    }

    /// Add a new job to the scheduler
    pub async fn add_job(&self, job: Job) -> SchedulerResult<JobId> {
        let metadata = job.get_metadata().await;
        let job_id = metadata.id;
        let job_name = metadata.name.clone();
        let schedule = metadata.schedule.clone();

        info!(job_id = %job_id, job_name = %job_name, schedule = %schedule, "Adding job to scheduler");

        let job_arc = Arc::new(job);
        let job_for_cron = job_arc.clone();
        let service = self.service.clone();
        let cron_job = tokio_cron_scheduler::Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let job = job_for_cron.clone();
            let service = service.clone();
            Box::pin(async move {
                if let Err(e) = run_job(&job, service).await {
                    let metadata = job.get_metadata().await;
                    error!(
                        job_id = %metadata.id,
                        job_name = %metadata.name,
                        error = %e,
                        "Job execution failed"
                    );
                }
            })
        })
        .map_err(|e: JobSchedulerError| SchedulerError::InvalidCronExpression {
            expression: schedule.clone(),
            message: e.to_string(),
        })?;

        self.scheduler
            .add(cron_job)
            .await
            .map_err(|e| SchedulerError::JobCreationFailed(e.to_string()))?;

        self.jobs.insert(job_id, job_arc);
        SCHEDULER_METRICS.update_job_count(self.jobs.len() as f64);

        info!(job_id = %job_id, job_name = %job_name, "Job added successfully");
        Ok(job_id)
    }

    /// Run a registered job immediately, outside its schedule
    pub async fn trigger(&self, job_name: &str) -> SchedulerResult<Result<JobOutcome, String>> {
        let handles: Vec<Arc<Job>> = self.jobs.iter().map(|e| e.value().clone()).collect();
        for job in handles {
            let metadata = job.get_metadata().await;
            if metadata.name == job_name {
                let result = run_job(&job, self.service.clone()).await;
                if let Err(e) = &result {
                    error!(job_id = %metadata.id, job_name = %job_name, error = %e, "Triggered job failed");
                }
                return Ok(result);
            }
        }
        Err(SchedulerError::JobNotFound(job_name.to_string()))
    }

    fn spawn_revalidation_listener(&self) -> Option<JoinHandle<()>> {
        let Some(mut requests) = self.service.cache().take_refresh_receiver() else {
            warn!("Refresh receiver already taken, stale reads will not trigger refreshes");
            return None;
        };
        let service = self.service.clone();

        Some(tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                debug!(
                    station = %request.station,
                    bucket = %request.bucket,
                    "Stale prediction read, refreshing forward window"
                );
                match service.refresh_forward(Utc::now()).await {
                    Ok(RefreshOutcome::Skipped) => debug!("Refresh already in progress"),
                    Ok(RefreshOutcome::Completed { records, .. }) => {
                        debug!(records = records, "Revalidation refresh finished")
                    }
                    Err(e) => warn!(error = %e, "Revalidation refresh failed"),
                }
            }
        }))
    }

    /// List all jobs
    pub async fn list_jobs(&self) -> Vec<JobMetadata> {
        let handles: Vec<Arc<Job>> = self.jobs.iter().map(|e| e.value().clone()).collect();
        let mut jobs = Vec::with_capacity(handles.len());
        for job in handles {
            jobs.push(job.get_metadata().await);
        }
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// Get scheduler statistics
    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.list_jobs().await;

        let total_jobs = jobs.len();
        let running_jobs = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count();

        let total_executions: u64 = jobs.iter().map(|j| j.run_count).sum();
        let total_successes: u64 = jobs.iter().map(|j| j.success_count).sum();
        let total_skips: u64 = jobs.iter().map(|j| j.skip_count).sum();
        let total_failures: u64 = jobs.iter().map(|j| j.failure_count).sum();

        let success_rate = if total_executions > 0 {
            (total_successes as f64 / total_executions as f64) * 100.0
        } else {
            0.0
        };

        SchedulerStats {
            total_jobs,
            running_jobs,
            total_executions,
            total_successes,
            total_skips,
            total_failures,
            success_rate,
        }
    }

    /// Check if scheduler is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

async fn run_job(job: &Job, service: Arc<PredictionService>) -> Result<JobOutcome, String> {
    let metadata = job.get_metadata().await;
    let job_name = metadata.name.clone();
    let job_id = metadata.id;

    debug!(job_id = %job_id, job_name = %job_name, "Executing scheduled job");
    SCHEDULER_METRICS.record_execution_start(&job_name);

    let start = std::time::Instant::now();
    let result = job.execute(service).await;
    let duration = start.elapsed();

    let outcome = match &result {
        Ok(outcome) => outcome.label(),
        Err(_) => "failure",
    };
    SCHEDULER_METRICS.record_execution_complete(&job_name, outcome, duration.as_secs_f64());

    match &result {
        Ok(JobOutcome::Completed(summary)) => info!(
            job_id = %job_id,
            job_name = %job_name,
            duration_ms = duration.as_millis() as u64,
            summary = %summary,
            "Job executed successfully"
        ),
        Ok(JobOutcome::Skipped(reason)) => info!(
            job_id = %job_id,
            job_name = %job_name,
            reason = %reason,
            "Job skipped"
        ),
        // Callers report failures
        Err(_) => debug!(
            job_id = %job_id,
            job_name = %job_name,
            duration_ms = duration.as_millis() as u64,
            "Job returned an error"
        ),
    }

    result
}

/// Statistics about the scheduler
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub total_executions: u64,
    pub total_successes: u64,
    pub total_skips: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}
