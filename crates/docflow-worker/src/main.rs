//! DocFlow worker binary.
//!
//! Polls the EMR inbox on an interval and tags each scanned document with its
//! patient, category and providers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use docflow_worker::{Settings, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "docflow-worker", version, about = "Scanned document intake worker")]
struct Cli {
    /// Domain settings YAML (overrides DOCFLOW_SETTINGS_PATH)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Persisted state file (overrides DOCFLOW_STATE_PATH)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,docflow_worker=debug,docflow_engine=debug".into()),
        )
        .with(fmt_layer)
        .init();

    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env().context("invalid DOCFLOW_* environment")?;
    if let Some(path) = cli.settings {
        config.settings_path = path;
    }
    if let Some(path) = cli.state {
        config.state_path = path;
    }
    tracing::info!(
        worker_id = %config.worker_id,
        settings = %config.settings_path.display(),
        state = %config.state_path.display(),
        "Worker configuration loaded"
    );

    let settings = Settings::load(&config.settings_path)
        .with_context(|| format!("cannot load settings from {}", config.settings_path.display()))?;
    let worker = Worker::new(config, &settings)?;

    if cli.once {
        let outcome = worker.run_once().await?;
        tracing::info!(outcome = ?outcome, "Single tick finished");
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker error");
                return Err(e);
            }
        }
        _ = shutdown => {
            tracing::info!("Shutting down worker");
        }
    }

    tracing::info!("Worker stopped");
    Ok(())
}
