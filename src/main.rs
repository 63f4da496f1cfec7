use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transit_risk_engine::{
    config::{Config, ObservabilityConfig},
    ml::PredictionService,
    notifications::{build_emitter, NotificationEmitter},
    scheduler::{init_scheduler_metrics, RetrainScheduler},
    state::{create_source, PredictionCache},
};

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("transit_risk_engine={}", config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config.observability);
    tracing::info!("Starting Transit Risk Engine v{}", env!("CARGO_PKG_VERSION"));

    if config.observability.prometheus_enabled {
        init_scheduler_metrics();
        tracing::info!("✅ Prometheus metrics initialized");
    }

    // Incident source
    tracing::info!("Incident source backend: {:?}", config.state.backend);
    let source = create_source(&config.state)?;

    // Prediction cache, warmed from the last snapshot
    let cache = Arc::new(PredictionCache::new(config.cache.clone()));
    let restored = cache.restore_from_storage();
    tracing::info!(restored = restored, "✅ Prediction cache initialized");

    // Notifications
    let emitter: Arc<dyn NotificationEmitter> = Arc::new(build_emitter(&config.notifications)?);

    let service = Arc::new(
        PredictionService::new(config.ml.clone(), cache.clone(), source, emitter)
            .with_stations(config.station_names()),
    );
    tracing::info!(stations = config.stations.len(), "✅ Prediction service initialized");

    // Cold start and cron jobs
    let mut scheduler = RetrainScheduler::new(config.scheduler.clone(), service.clone()).await?;
    scheduler.start().await?;

    for job in scheduler.list_jobs().await {
        tracing::info!(job_name = %job.name, schedule = %job.schedule, "Job scheduled");
    }
    tracing::info!("🚀 Transit Risk Engine running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await?;

    match cache.snapshot_async().await {
        Ok(count) => tracing::info!(count = count, "Prediction cache snapshot written"),
        Err(e) => tracing::error!(error = %e, "Failed to write prediction cache snapshot"),
    }

    tracing::info!("👋 Transit Risk Engine stopped");
    Ok(())
}
