use clap::Parser;
use common::{TelemetryConfig, TelemetryGuard};
use inference::{Engine, InferenceConfig, logging::setup_logging};
use std::path::PathBuf;

#[cfg(not(any(feature = "ort-backend", feature = "torch-backend")))]
compile_error!("At least one backend feature must be enabled: 'ort-backend' or 'torch-backend'");

/// Run every registered classifier on an image and print the report as JSON.
#[derive(Debug, Parser)]
#[command(name = "inference", version)]
struct Cli {
    /// Image to analyze
    image: PathBuf,

    /// Job identifier embedded in heatmap file names
    #[arg(long)]
    job_id: Option<i64>,

    /// JSON registry to use instead of the built-in catalog
    #[arg(long, value_name = "PATH")]
    registry: Option<PathBuf>,

    /// Skip occlusion heatmaps
    #[arg(long)]
    no_heatmaps: bool,

    /// Single-line JSON output
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = InferenceConfig::from_env()?;

    if let Some(path) = cli.registry {
        config.registry_path = Some(path);
    }
    if cli.no_heatmaps {
        config.heatmaps_enabled = false;
    }

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => {
            let telemetry = TelemetryConfig::from_env("inference", endpoint, config.environment);
            Some(TelemetryGuard::init(&telemetry)?)
        }
        None => {
            setup_logging(&config);
            None
        }
    };

    tracing::info!(config = ?config, "Loaded configuration");

    let engine = Engine::from_config(&config)?;
    tracing::info!(
        models = engine.registry().len(),
        capabilities = ?engine.cache().runtimes().capabilities(),
        "Engine ready"
    );

    let report = engine.run_all(&cli.image, cli.job_id).await?;

    let json = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", json);

    Ok(())
}
