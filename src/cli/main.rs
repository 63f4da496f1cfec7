use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use transit_risk_engine::{
    config::Config,
    metrics,
    ml::PredictionService,
    models::IncidentEvent,
    notifications::{build_emitter, NotificationEmitter},
    state::{create_source, PredictionCache, SledIncidentSource},
};

#[derive(Parser)]
#[command(name = "transit-risk-cli")]
#[command(about = "Transit Risk Engine CLI", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "TRANSIT_RISK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import incident events from a JSON array into the sled store
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Retrain the model from the stored history
    Train,

    /// Recompute, cache and publish forward predictions
    Refresh,

    /// Risk for a station at the next occurrence of an hour (UTC)
    Risk {
        #[arg(short, long)]
        station: String,

        #[arg(short = 'H', long)]
        hour: u32,
    },

    /// Forward predictions for all stations
    Forecast {
        #[arg(short = 'H', long, default_value = "24")]
        hours: u32,
    },

    /// Active model status and last training run
    Insights,

    /// Print Prometheus metrics
    Metrics,

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn build_service(config: &Config) -> anyhow::Result<Arc<PredictionService>> {
    let source = create_source(&config.state).context("failed to open incident source")?;

    let cache = Arc::new(PredictionCache::new(config.cache.clone()));
    cache.restore_from_storage();

    let emitter: Arc<dyn NotificationEmitter> = Arc::new(build_emitter(&config.notifications)?);
    let service = PredictionService::new(config.ml.clone(), cache, source, emitter)
        .with_stations(config.station_names());
    service.restore_latest();

    Ok(Arc::new(service))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transit_risk_engine=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        std::env::set_var("TRANSIT_RISK_CONFIG", path);
    }
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Import { file } => {
            let path = config
                .state
                .path
                .clone()
                .context("import requires state.path to point at a sled database")?;
            let raw = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let events: Vec<IncidentEvent> = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", file.display()))?;

            let source = SledIncidentSource::new(path)?;
            let imported = source.append(&events)?;
            source.flush().await?;
            println!("Imported {} events ({} stored)", imported, source.len());
        }

        Commands::Train => {
            let service = build_service(&config)?;
            let outcome = service.trigger_retrain().await?;
            println!("{:#?}", outcome);
            if let Some(diagnostics) = service.last_diagnostics() {
                print_json(&diagnostics)?;
            }
        }

        Commands::Refresh => {
            let service = build_service(&config)?;
            let outcome = service.refresh_forward(Utc::now()).await?;
            println!("{:#?}", outcome);
        }

        Commands::Risk { station, hour } => {
            if hour >= 24 {
                bail!("hour must be between 0 and 23");
            }
            let service = build_service(&config)?;
            let estimate = service.get_risk(&station, hour).await?;
            print_json(&serde_json::json!({
                "station": station,
                "hour": hour,
                "risk_score": estimate.risk_score,
                "incident_type": estimate.incident_type,
            }))?;
        }

        Commands::Forecast { hours } => {
            let service = build_service(&config)?;
            let predictions = service.get_forward_predictions(hours).await?;
            print_json(&predictions)?;
        }

        Commands::Insights => {
            let service = build_service(&config)?;
            print_json(&service.model_insights().await?)?;
        }

        Commands::Metrics => {
            print!("{}", metrics::render());
        }

        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
