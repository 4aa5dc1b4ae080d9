//! Lock, poll and retry accounting around a workflow run.
//!
//! One tick takes the persisted lock, polls the configured queue for the
//! next unprocessed item, runs the workflow over it and advances the cursor
//! only after the tagging update was accepted. Items that keep failing are
//! abandoned once the retry budget is spent.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::sync::Arc;

use docflow_engine::{FlowError, FlowResult, RunReport, WorkflowEngine};

use crate::client::DocumentSource;
use crate::context::{DocumentTask, RunSettings, Services, WorkflowContext};
use crate::queue::{Cursor, QueueItem, QueueKind};
use crate::result_ext::ResultExt;
use crate::settings::Settings;
use crate::store::StateStore;

/// What to do with an item whose retry budget is spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiveUpPolicy {
    /// Tag the item as skipped at the source, then move the cursor past it.
    Skip,
    /// Only move the cursor past the item.
    #[default]
    Advance,
}

/// Queue and retry settings of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeOptions {
    pub queue: QueueKind,
    pub max_retries: u32,
    pub policy: GiveUpPolicy,
}

impl IntakeOptions {
    pub fn from_settings(settings: &Settings) -> FlowResult<Self> {
        let processing = settings.file_processing()?;
        Ok(Self {
            queue: settings.queue(),
            max_retries: processing.max_retries,
            policy: processing.give_up_policy,
        })
    }
}

impl Default for IntakeOptions {
    fn default() -> Self {
        Self {
            queue: QueueKind::Pending,
            max_retries: 3,
            policy: GiveUpPolicy::Advance,
        }
    }
}

/// Payload of a freshly fetched item.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub queue: QueueKind,
    pub item: QueueItem,
    pub bytes: Vec<u8>,
}

/// Result of polling a queue.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Nothing newer than the cursor.
    Idle,
    /// Retry budget spent; the item was abandoned.
    GaveUp(QueueItem),
    Fetched(FetchedDocument),
    /// Fetch failed; the attempt still counts against the budget.
    FetchFailed { item: QueueItem, error: String },
}

/// Result of one scheduler tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Another tick holds the lock; nothing was done.
    Locked,
    Idle,
    GaveUp(QueueItem),
    FetchFailed { item: QueueItem, error: String },
    /// The workflow tagged the document and the cursor moved to it.
    Processed { item: QueueItem, report: RunReport },
    /// The workflow ended without a tagging update; the item will be retried.
    Unfinished { item: QueueItem, report: RunReport },
}

pub struct IntakeController {
    store: Arc<dyn StateStore>,
    source: Arc<dyn DocumentSource>,
    services: Services,
    engine: Arc<WorkflowEngine<WorkflowContext>>,
    settings: Arc<RunSettings>,
    options: IntakeOptions,
}

impl IntakeController {
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn DocumentSource>,
        services: Services,
        engine: Arc<WorkflowEngine<WorkflowContext>>,
        settings: Arc<RunSettings>,
        options: IntakeOptions,
    ) -> Self {
        Self {
            store,
            source,
            services,
            engine,
            settings,
            options,
        }
    }

    pub fn options(&self) -> IntakeOptions {
        self.options
    }

    /// Take the lock. Returns false if it is already held.
    pub fn check_lock(&self) -> FlowResult<bool> {
        self.store.try_acquire_lock()
    }

    pub fn release_lock(&self) -> FlowResult<()> {
        self.store.release_lock()
    }

    /// Persist a starting cursor for queues without a natural one.
    ///
    /// Returns true if a cursor was written.
    pub fn seed_cursor(&self, now: NaiveDateTime) -> FlowResult<bool> {
        let queue = self.options.queue;
        if self.store.cursor(queue)?.is_some() || queue.initial_cursor().is_some() {
            return Ok(false);
        }
        self.store.set_cursor(queue, Cursor::Timestamp(now))?;
        tracing::info!(queue = %queue, cursor = %now, "Seeded queue cursor");
        Ok(true)
    }

    fn current_cursor(&self) -> FlowResult<Cursor> {
        let queue = self.options.queue;
        self.store
            .cursor(queue)?
            .or_else(|| queue.initial_cursor())
            .ok_or_else(|| {
                FlowError::Configuration(format!("no cursor persisted for the {} queue", queue))
            })
    }

    /// Look for the next unprocessed item and fetch it, applying retry
    /// accounting. The cursor never moves here except on give-up.
    pub async fn poll(&self) -> FlowResult<PollOutcome> {
        let queue = self.options.queue;
        let cursor = self.current_cursor()?;

        let Some(item) = self.source.next_after(queue, &cursor).await? else {
            tracing::debug!(queue = %queue, cursor = %cursor, "No new documents");
            return Ok(PollOutcome::Idle);
        };

        let retries = self.store.retries(queue)?;
        if retries >= self.options.max_retries {
            self.give_up(&item).await?;
            return Ok(PollOutcome::GaveUp(item));
        }

        self.store.set_retries(queue, retries + 1)?;
        tracing::info!(
            document_id = %item.document_id,
            queue = %queue,
            attempt = retries + 1,
            "Fetching document"
        );

        match self.source.fetch(&item).await {
            Ok(bytes) => Ok(PollOutcome::Fetched(FetchedDocument { queue, item, bytes })),
            Err(e) => {
                tracing::warn!(document_id = %item.document_id, error = %e, "Fetch failed");
                Ok(PollOutcome::FetchFailed {
                    item,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Abandon an item per the give-up policy and reset the retry counter.
    pub async fn give_up(&self, item: &QueueItem) -> FlowResult<()> {
        let queue = self.options.queue;
        if self.options.policy == GiveUpPolicy::Skip {
            self.source.mark_skipped(item).await?;
        }

        let cursor = Cursor::past(item);
        self.store.advance(queue, cursor.clone())?;

        tracing::warn!(
            document_id = %item.document_id,
            queue = %queue,
            policy = ?self.options.policy,
            cursor = %cursor,
            "Retry budget exhausted, giving up on document"
        );
        Ok(())
    }

    /// Record a fully processed item.
    pub fn complete(&self, item: &QueueItem) -> FlowResult<()> {
        self.store.advance(self.options.queue, Cursor::at(item))
    }

    /// Run one scheduler tick. The lock is released on every path once taken.
    pub async fn tick(&self) -> FlowResult<TickOutcome> {
        if !self.check_lock()? {
            tracing::info!(queue = %self.options.queue, "Intake lock held, skipping tick");
            return Ok(TickOutcome::Locked);
        }

        let guard = LockGuard::new(self.store.as_ref());
        let outcome = self.tick_locked().await;
        let released = guard.release();

        match outcome {
            Ok(outcome) => released.map(|_| outcome),
            Err(e) => {
                if let Err(release_err) = released {
                    tracing::error!(error = %release_err, "Failed to release intake lock");
                }
                Err(e)
            }
        }
    }

    async fn tick_locked(&self) -> FlowResult<TickOutcome> {
        let directory = self.services.directory.clone();
        directory.login().await?;

        let outcome = match self.poll().await {
            Ok(PollOutcome::Fetched(fetched)) => return self.process(fetched).await,
            Ok(PollOutcome::Idle) => Ok(TickOutcome::Idle),
            Ok(PollOutcome::GaveUp(item)) => Ok(TickOutcome::GaveUp(item)),
            Ok(PollOutcome::FetchFailed { item, error }) => Ok(TickOutcome::FetchFailed { item, error }),
            Err(e) => Err(e),
        };

        // The engine closes the session for fetched documents.
        directory.close().await;
        outcome
    }

    async fn process(&self, fetched: FetchedDocument) -> FlowResult<TickOutcome> {
        let FetchedDocument { queue, item, bytes } = fetched;
        let task = DocumentTask::new(queue, item.clone(), bytes);
        let mut ctx = WorkflowContext::new(task, self.settings.clone(), self.services.clone());

        let report = self
            .engine
            .execute_workflow(&mut ctx)
            .await
            .log_for(&item.document_id)?;

        if ctx.task.submitted {
            self.complete(&item).log_for(&item.document_id)?;
            tracing::info!(
                document_id = %item.document_id,
                needs_review = ctx.task.needs_review,
                "Document processed"
            );
            Ok(TickOutcome::Processed { item, report })
        } else {
            tracing::warn!(
                document_id = %item.document_id,
                steps = ?report.visited,
                "Workflow ended without tagging, document will be retried"
            );
            Ok(TickOutcome::Unfinished { item, report })
        }
    }
}

/// Held intake lock. Dropping it unreleased, as when a tick future is
/// cancelled mid-run, releases the lock.
struct LockGuard<'a> {
    store: &'a dyn StateStore,
    armed: bool,
}

impl<'a> LockGuard<'a> {
    fn new(store: &'a dyn StateStore) -> Self {
        Self { store, armed: true }
    }

    fn release(mut self) -> FlowResult<()> {
        self.armed = false;
        self.store.release_lock()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.release_lock() {
            Ok(()) => tracing::warn!("Tick interrupted, intake lock released"),
            Err(e) => tracing::error!(error = %e, "Failed to release intake lock after interrupted tick"),
        }
    }
}

impl std::fmt::Debug for IntakeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeController")
            .field("options", &self.options)
            .field("engine", &self.engine)
            .finish()
    }
}
