//! Scheduled jobs, their run statistics and the run flags that keep one
//! kind of work from overlapping itself

use super::error::SchedulerResult;
use crate::ml::PredictionService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a scheduled job
pub type JobId = Uuid;

/// State of a job after its last trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    /// The same work was already in progress
    Skipped,
    Failed,
}

/// What a job run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Completed(String),
    Skipped(String),
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed(_) => "success",
            JobOutcome::Skipped(_) => "skipped",
        }
    }
}

/// Registration data and run statistics of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    /// Six-field cron expression
    pub schedule: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,

    pub run_count: u64,
    pub success_count: u64,
    /// Runs that found the same work already in progress
    pub skip_count: u64,
    pub failure_count: u64,
    pub avg_duration_ms: f64,
    pub last_error: Option<String>,
}

impl JobMetadata {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            schedule: schedule.into(),
            status: JobStatus::Scheduled,
            created_at: now,
            updated_at: now,
            last_run: None,
            run_count: 0,
            success_count: 0,
            skip_count: 0,
            failure_count: 0,
            avg_duration_ms: 0.0,
            last_error: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn update_execution(&mut self, result: &Result<JobOutcome, String>, duration_ms: u64) {
        self.run_count += 1;
        self.status = match result {
            Ok(JobOutcome::Completed(_)) => {
                self.success_count += 1;
                self.last_error = None;
                JobStatus::Completed
            }
            Ok(JobOutcome::Skipped(_)) => {
                self.skip_count += 1;
                JobStatus::Skipped
            }
            Err(e) => {
                self.failure_count += 1;
                self.last_error = Some(e.clone());
                JobStatus::Failed
            }
        };

        self.avg_duration_ms = ((self.avg_duration_ms * (self.run_count - 1) as f64)
            + duration_ms as f64)
            / self.run_count as f64;

        self.last_run = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn success_rate(&self) -> f64 {
        if self.run_count == 0 {
            0.0
        } else {
            (self.success_count as f64 / self.run_count as f64) * 100.0
        }
    }
}

/// Context passed to job execution functions
#[derive(Clone)]
pub struct JobContext {
    /// Snapshot of the job metadata at trigger time
    pub metadata: JobMetadata,

    /// Service the job operates on
    pub service: Arc<PredictionService>,
}

impl JobContext {
    pub fn new(metadata: JobMetadata, service: Arc<PredictionService>) -> Self {
        Self { metadata, service }
    }
}

type JobFn = dyn Fn(JobContext) -> Pin<Box<dyn Future<Output = SchedulerResult<JobOutcome>> + Send>>
    + Send
    + Sync;

/// A scheduled job
pub struct Job {
    /// Job metadata
    pub metadata: Arc<tokio::sync::RwLock<JobMetadata>>,

    /// Job execution function
    execute: Arc<JobFn>,
}

impl Job {
    pub fn new<F, Fut>(metadata: JobMetadata, execute: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SchedulerResult<JobOutcome>> + Send + 'static,
    {
        Self {
            metadata: Arc::new(tokio::sync::RwLock::new(metadata)),
            execute: Arc::new(move |ctx| Box::pin(execute(ctx))),
        }
    }

    pub async fn get_metadata(&self) -> JobMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn execute(&self, service: Arc<PredictionService>) -> Result<JobOutcome, String> {
        let start = std::time::Instant::now();

        let ctx = {
            let mut metadata = self.metadata.write().await;
            metadata.status = JobStatus::Running;
            metadata.updated_at = Utc::now();
            JobContext::new(metadata.clone(), service)
        };

        let result = (self.execute)(ctx).await.map_err(|e| e.to_string());

        let duration_ms = start.elapsed().as_millis() as u64;
        self.metadata
            .write()
            .await
            .update_execution(&result, duration_ms);

        result
    }
}

/// Mutual-exclusion flag for one kind of job.
///
/// A second trigger while the flag is held gets `None` and must not queue.
#[derive(Debug, Default)]
pub struct RunFlag {
    running: AtomicBool,
}

impl RunFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                flag: Arc::clone(self),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Holds a [`RunFlag`] until dropped
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<RunFlag>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::Release);
    }
}
