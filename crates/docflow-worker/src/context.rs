//! Per-document run context handed to every step.

use async_trait::async_trait;
use std::sync::Arc;

use docflow_engine::{FlowContext, FlowResult, SharedState};

use crate::client::{EmrDirectory, IdentityCandidate, LanguageModel, TextExtractor};
use crate::queue::{QueueItem, QueueKind};
use crate::resolve::{Prompter, Sampling};
use crate::settings::{DefaultValues, DocumentCategory, Prompts, Settings};

/// External collaborators shared by every run.
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn EmrDirectory>,
    pub model: Arc<dyn LanguageModel>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Settings every run reads, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub prompts: Prompts,
    pub defaults: DefaultValues,
    pub categories: Vec<DocumentCategory>,
    pub sampling: Sampling,
}

impl RunSettings {
    pub fn from_settings(settings: &Settings) -> FlowResult<Self> {
        let ai = settings.ai()?;
        Ok(Self {
            prompts: settings.prompts(),
            defaults: settings.default_values(),
            categories: settings.document_categories()?,
            sampling: Sampling {
                temperature: ai.temperature,
                top_p: ai.top_p,
            },
        })
    }
}

/// Working data of one document as it moves through the workflow.
#[derive(Debug, Clone)]
pub struct DocumentTask {
    pub document_id: String,
    pub queue: QueueKind,
    pub item: QueueItem,
    pub bytes: Vec<u8>,
    pub evidence: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub patient: Option<IdentityCandidate>,
    /// Append-only.
    pub provider_ids: Vec<String>,
    pub needs_review: bool,
    /// Set once the directory accepted the tagging update.
    pub submitted: bool,
}

impl DocumentTask {
    pub fn new(queue: QueueKind, item: QueueItem, bytes: Vec<u8>) -> Self {
        Self {
            document_id: item.document_id.clone(),
            queue,
            item,
            bytes,
            evidence: None,
            category: None,
            description: None,
            patient: None,
            provider_ids: Vec::new(),
            needs_review: false,
            submitted: false,
        }
    }

    /// Evidence text, empty until extraction ran.
    pub fn evidence(&self) -> &str {
        self.evidence.as_deref().unwrap_or("")
    }
}

/// Context passed to step functions for one run.
pub struct WorkflowContext {
    pub task: DocumentTask,
    pub settings: Arc<RunSettings>,
    pub services: Services,
    state: SharedState,
}

impl WorkflowContext {
    pub fn new(task: DocumentTask, settings: Arc<RunSettings>, services: Services) -> Self {
        Self {
            task,
            settings,
            services,
            state: SharedState::new(),
        }
    }

    pub fn prompter(&self) -> Prompter<'_> {
        Prompter::new(self.services.model.as_ref(), self.settings.sampling)
    }
}

#[async_trait]
impl FlowContext for WorkflowContext {
    fn shared_state(&self) -> &SharedState {
        &self.state
    }

    fn shared_state_mut(&mut self) -> &mut SharedState {
        &mut self.state
    }

    fn run_id(&self) -> String {
        self.task.document_id.clone()
    }

    async fn close(&mut self) {
        self.services.directory.close().await;
    }
}
