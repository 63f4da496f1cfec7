//! Scheduled tasks of the prediction engine

use super::error::{SchedulerError, SchedulerResult};
use super::jobs::{JobContext, JobOutcome};
use crate::error::AppError;
use crate::ml::{HealthOutcome, RefreshOutcome, RetrainOutcome, TrainingStatus};
use chrono::Utc;
use tracing::{info, warn};

/// Retrain the model from the full incident history
///
/// A successful retrain is followed by a forward refresh so the cache moves
/// to the new model version right away.
///
/// Default schedule: Sunday 23:00 (`0 0 23 * * Sun`)
pub async fn weekly_retrain(ctx: JobContext) -> SchedulerResult<JobOutcome> {
    info!(job_name = %ctx.metadata.name, "Starting weekly_retrain task");

    let outcome = ctx.service.retrain().await?;
    retrain_result(&ctx, outcome).await
}

/// Recompute and publish the forward prediction window
///
/// Default schedule: top of every hour (`0 0 * * * *`)
pub async fn forward_refresh(ctx: JobContext) -> SchedulerResult<JobOutcome> {
    match ctx.service.refresh_forward(Utc::now()).await? {
        RefreshOutcome::Skipped => Ok(JobOutcome::Skipped("forward refresh already running".into())),
        RefreshOutcome::Completed {
            records,
            model_version,
            ..
        } => Ok(JobOutcome::Completed(format!(
            "{} predictions from {}",
            records, model_version
        ))),
    }
}

/// Retrain out of schedule when validation accuracy has dropped
///
/// Default schedule: every 12 hours (`0 0 */12 * * *`)
pub async fn health_check(ctx: JobContext) -> SchedulerResult<JobOutcome> {
    match ctx.service.health_check().await? {
        HealthOutcome::NoMetrics => Ok(JobOutcome::Completed("no metrics yet".into())),
        HealthOutcome::Healthy { accuracy } => {
            Ok(JobOutcome::Completed(format!("accuracy {:.3}", accuracy)))
        }
        HealthOutcome::Retrained { accuracy, outcome } => {
            warn!(accuracy = accuracy, "Health check forced a retrain");
            retrain_result(&ctx, outcome).await
        }
    }
}

async fn retrain_result(ctx: &JobContext, outcome: RetrainOutcome) -> SchedulerResult<JobOutcome> {
    match outcome {
        RetrainOutcome::Skipped => Ok(JobOutcome::Skipped("retrain already running".into())),
        RetrainOutcome::Trained { version, .. } => {
            ctx.service.refresh_forward(Utc::now()).await?;
            Ok(JobOutcome::Completed(format!("model {} activated", version)))
        }
        RetrainOutcome::Rejected(diagnostics) if diagnostics.status == TrainingStatus::InsufficientData => {
            Ok(JobOutcome::Completed(format!(
                "not enough history ({} sequences), previous model kept",
                diagnostics.n_sequences
            )))
        }
        RetrainOutcome::Rejected(diagnostics) => Err(SchedulerError::JobExecutionFailed(
            AppError::TrainingFailure(format!(
                "{}: {}",
                diagnostics.status.as_str(),
                diagnostics.error.unwrap_or_default()
            )),
        )),
    }
}
