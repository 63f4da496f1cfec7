//! Retrain scheduler: mutual exclusion, training budget and job wiring

mod common;

use chrono::Utc;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use transit_risk_engine::{
    ml::{MLConfig, PredictionService, RetrainOutcome, TrainingStatus},
    scheduler::{JobOutcome, RetrainScheduler, SchedulerConfigBuilder, SchedulerError},
    state::{InMemoryIncidentSource, PredictionCache},
};

fn slow_service(dir: &TempDir, delay_ms: u64, timeout_ms: u64) -> Arc<PredictionService> {
    let config = MLConfig {
        training_timeout_ms: timeout_ms,
        ..ml_config(dir)
    };
    Arc::new(
        PredictionService::new(
            config,
            Arc::new(PredictionCache::new(cache_config(dir))),
            Arc::new(InMemoryIncidentSource::with_events(hourly_events("Calle 26", 3))),
            Arc::new(RecordingEmitter::default()),
        )
        .with_factory(Arc::new(SlowModelFactory {
            delay: Duration::from_millis(delay_ms),
        })),
    )
}

#[tokio::test]
async fn test_concurrent_retrain_is_skipped_not_queued() {
    let dir = TempDir::new().unwrap();
    let service = slow_service(&dir, 200, 10_000);

    let outcomes: Vec<RetrainOutcome> =
        futures::future::join_all((0..4).map(|_| service.retrain()))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, RetrainOutcome::Skipped))
        .count();
    assert_eq!(skipped, 3);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, RetrainOutcome::Rejected(d) if d.status == TrainingStatus::Failed)));
    assert!(!service.is_retraining());
}

#[tokio::test]
async fn test_training_timeout_keeps_flag_until_worker_ends() {
    let dir = TempDir::new().unwrap();
    let service = slow_service(&dir, 400, 50);

    match service.retrain().await.unwrap() {
        RetrainOutcome::Rejected(diagnostics) => {
            assert_eq!(diagnostics.status, TrainingStatus::TimedOut)
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(service.active_version().is_none());

    // The blocking worker is still sleeping and still owns the flag
    assert!(service.is_retraining());
    assert!(matches!(service.retrain().await.unwrap(), RetrainOutcome::Skipped));

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!service.is_retraining());
}

#[tokio::test]
async fn test_start_cold_starts_and_registers_jobs() {
    let dir = TempDir::new().unwrap();
    let emitter = Arc::new(RecordingEmitter::default());
    let service = Arc::new(
        service_with(&dir, hourly_events("Calle 26", 3), emitter.clone())
            .with_stations(vec!["Portal Norte".to_string()]),
    );

    let mut scheduler = RetrainScheduler::new(SchedulerConfigBuilder::new().build(), service.clone())
        .await
        .expect("Failed to create scheduler");
    scheduler.start().await.expect("Failed to start scheduler");
    assert!(scheduler.is_running().await);

    // Too little history to train: heuristic batch for both stations
    assert!(service.active_version().is_none());
    assert_eq!(service.cache().len(), 48);
    assert_eq!(emitter.calls(), 1);

    let names: Vec<String> = scheduler.list_jobs().await.into_iter().map(|j| j.name).collect();
    assert_eq!(names, vec!["forward_refresh", "health_check", "weekly_retrain"]);

    let outcome = scheduler.trigger("forward_refresh").await.unwrap();
    assert!(matches!(outcome, Ok(JobOutcome::Completed(_))));
    assert_eq!(emitter.calls(), 2);

    // Insufficient history is not a job failure
    let outcome = scheduler.trigger("weekly_retrain").await.unwrap();
    assert!(matches!(outcome, Ok(JobOutcome::Completed(_))));

    assert!(matches!(
        scheduler.trigger("cleanup").await,
        Err(SchedulerError::JobNotFound(_))
    ));

    let stats = scheduler.get_stats().await;
    assert_eq!(stats.total_jobs, 3);
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.total_failures, 0);

    scheduler.shutdown().await.expect("Failed to stop scheduler");
    assert!(!scheduler.is_running().await);
}

#[tokio::test]
async fn test_unordered_log_fails_the_retrain_job_not_the_scheduler() {
    let dir = TempDir::new().unwrap();
    let mut events = hourly_events("Calle 26", 30);
    events.swap(3, 4);
    let service = Arc::new(PredictionService::new(
        ml_config(&dir),
        Arc::new(PredictionCache::new(cache_config(&dir))),
        Arc::new(RawLogSource { events }),
        Arc::new(RecordingEmitter::default()),
    ));

    let mut scheduler = RetrainScheduler::new(SchedulerConfigBuilder::new().build(), service.clone())
        .await
        .expect("Failed to create scheduler");
    scheduler.start().await.expect("Failed to start scheduler");

    // Cold start recorded the rejected cycle and still filled the cache
    assert_eq!(
        service.last_diagnostics().map(|d| d.status),
        Some(TrainingStatus::Failed)
    );
    assert!(service.active_version().is_none());
    assert_eq!(service.cache().len(), 24);

    let outcome = scheduler.trigger("weekly_retrain").await.unwrap();
    assert!(outcome.is_err());
    let outcome = scheduler.trigger("forward_refresh").await.unwrap();
    assert!(matches!(outcome, Ok(JobOutcome::Completed(_))));

    let stats = scheduler.get_stats().await;
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.total_failures, 1);

    scheduler.shutdown().await.expect("Failed to stop scheduler");
}

#[tokio::test]
async fn test_disabled_job_is_not_registered() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service_with(&dir, Vec::new(), Arc::new(RecordingEmitter::default())));

    let mut config = SchedulerConfigBuilder::new().build();
    config.jobs.health_check.enabled = false;

    let mut scheduler = RetrainScheduler::new(config, service).await.unwrap();
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.list_jobs().await.len(), 2);
    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_cron_expression_fails_start() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service_with(&dir, Vec::new(), Arc::new(RecordingEmitter::default())));
    let config = SchedulerConfigBuilder::new()
        .health_check("every now and then")
        .build();

    let mut scheduler = RetrainScheduler::new(config, service).await.unwrap();
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::InvalidCronExpression { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_read_triggers_background_refresh() {
    let dir = TempDir::new().unwrap();
    let cache_config = transit_risk_engine::config::CacheConfig {
        forward_ttl_secs: 0,
        ..cache_config(&dir)
    };
    let emitter = Arc::new(RecordingEmitter::default());
    let service = Arc::new(PredictionService::new(
        ml_config(&dir),
        Arc::new(PredictionCache::new(cache_config)),
        Arc::new(InMemoryIncidentSource::with_events(hourly_events("Calle 26", 3))),
        emitter.clone(),
    ));

    let config = SchedulerConfigBuilder::new().enabled(false).build();
    let mut scheduler = RetrainScheduler::new(config, service.clone()).await.unwrap();
    scheduler.start().await.unwrap();
    assert_eq!(emitter.calls(), 1);

    // Every batch entry is already stale: served anyway, refresh queued
    let record = service.get_risk_at("Calle 26", Utc::now()).await.unwrap();
    assert_eq!(record.station, "Calle 26");

    let mut refreshed = false;
    for _ in 0..50 {
        if emitter.calls() >= 2 {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refreshed, "stale read did not trigger a refresh");

    scheduler.shutdown().await.unwrap();
}
