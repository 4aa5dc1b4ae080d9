//! Worker lifecycle management.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use docflow_engine::WorkflowEngine;

use crate::client::{
    ChatCompletionClient, CommandExtractor, EmrSession, HttpDocumentSource, HttpEmrDirectory,
    PlainTextExtractor, TextExtractor,
};
use crate::config::WorkerConfig;
use crate::context::{RunSettings, Services};
use crate::intake::{IntakeController, IntakeOptions, TickOutcome};
use crate::settings::Settings;
use crate::steps::build_registry;
use crate::store::FileStateStore;

/// Scheduler that runs one intake tick per interval.
pub struct Worker {
    config: WorkerConfig,
    controller: IntakeController,
}

impl Worker {
    /// Build the worker from process configuration and domain settings.
    pub fn new(config: WorkerConfig, settings: &Settings) -> Result<Self> {
        let timeouts = config.http_timeouts();

        let session = EmrSession::new(settings.emr()?, timeouts)?;
        let extractor: Arc<dyn TextExtractor> = match CommandExtractor::from_settings(&settings.ocr()?) {
            Some(extractor) => Arc::new(extractor),
            None => Arc::new(PlainTextExtractor),
        };
        let services = Services {
            directory: Arc::new(HttpEmrDirectory::new(session.clone())),
            model: Arc::new(ChatCompletionClient::new(&settings.ai()?, timeouts)?),
            extractor,
        };

        let registry = Arc::new(build_registry());
        let definition = settings.workflow().context("invalid workflow definition")?;
        definition
            .validate_against(&registry)
            .context("workflow names a step this worker does not provide")?;
        for target in definition.dangling_targets() {
            tracing::warn!(target = %target, "Transition target is not a step, runs reaching it will end there");
        }
        let engine = Arc::new(WorkflowEngine::new(definition, registry));

        let options = IntakeOptions::from_settings(settings)?;
        let controller = IntakeController::new(
            Arc::new(FileStateStore::new(&config.state_path)),
            Arc::new(HttpDocumentSource::new(session)),
            services,
            engine,
            Arc::new(RunSettings::from_settings(settings)?),
            options,
        );

        let seeded = controller.seed_cursor(chrono::Local::now().naive_local())?;
        tracing::info!(
            worker_id = %config.worker_id,
            queue = %options.queue,
            max_retries = options.max_retries,
            seeded,
            "Worker initialized"
        );

        Ok(Self { config, controller })
    }

    /// Run a single tick.
    pub async fn run_once(&self) -> Result<TickOutcome> {
        let outcome = self.controller.tick().await?;
        tracing::debug!(worker_id = %self.config.worker_id, outcome = ?outcome, "Tick finished");
        Ok(outcome)
    }

    /// Tick on the configured interval until a fatal error.
    ///
    /// Transient failures are logged and retried on the next tick.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.controller.tick().await {
                Ok(outcome) => {
                    tracing::debug!(worker_id = %self.config.worker_id, outcome = ?outcome, "Tick finished");
                }
                Err(e) if e.is_transient() || !e.is_fatal() => {
                    tracing::warn!(worker_id = %self.config.worker_id, error = %e, "Tick failed, retrying next interval");
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.config.worker_id, error = %e, "Fatal error, stopping worker");
                    return Err(e.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.config.worker_id)
            .field("controller", &self.controller)
            .finish()
    }
}
