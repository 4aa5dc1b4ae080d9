//! In-memory collaborators for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docflow_engine::{FlowError, FlowResult};

use crate::client::{
    DocumentSource, DocumentUpdate, EmrDirectory, IdentityCandidate, LanguageModel, ProviderEntry,
    SearchMode, TextExtractor,
};
use crate::context::Services;
use crate::queue::{Cursor, QueueItem, QueueKind};

/// Case-insensitive SQL `LIKE` with `%` wildcards.
fn like(pattern: &str, value: &str) -> bool {
    let escaped: Vec<String> = pattern.split('%').map(regex::escape).collect();
    let re = format!("(?i)^{}$", escaped.join(".*"));
    regex::Regex::new(&re).map(|r| r.is_match(value)).unwrap_or(false)
}

/// Directory record with the fields searches look at.
#[derive(Debug, Clone)]
pub struct FakePatient {
    pub candidate: IdentityCandidate,
    pub hin: String,
}

impl FakePatient {
    pub fn new(demographic_no: &str, last: &str, first: &str, dob: &str, hin: &str) -> Self {
        Self {
            candidate: IdentityCandidate::new(
                demographic_no,
                format!("{}, {}", last.to_uppercase(), first.to_uppercase()),
                dob,
                "_",
            ),
            hin: hin.to_string(),
        }
    }

    pub fn with_provider(mut self, provider_no: &str) -> Self {
        self.candidate.provider_no = provider_no.to_string();
        self
    }

    fn matches(&self, mode: SearchMode, keyword: &str) -> bool {
        match mode {
            SearchMode::Name => {
                let (last_pat, first_pat) = keyword.split_once(',').unwrap_or((keyword, "%"));
                let (last, first) = self
                    .candidate
                    .formatted_name
                    .split_once(',')
                    .unwrap_or((self.candidate.formatted_name.as_str(), ""));
                like(last_pat, last.trim()) && like(first_pat, first.trim())
            }
            SearchMode::Dob => like(keyword, &self.candidate.formatted_dob),
            SearchMode::Hin => like(keyword, &self.hin),
            SearchMode::DemographicNo => self.candidate.demographic_no == keyword,
        }
    }
}

/// Directory answering searches from a fixed record list.
#[derive(Default)]
pub struct FakeDirectory {
    pub patients: Vec<FakePatient>,
    pub roster: Vec<ProviderEntry>,
    pub reject_updates: bool,
    pub fail_login: bool,
    pub searches: Mutex<Vec<(SearchMode, String)>>,
    pub updates: Mutex<Vec<DocumentUpdate>>,
    pub closed: AtomicUsize,
    pub logins: AtomicUsize,
    /// Records returned for demographic-number lookups instead of `patients`.
    pub lookup_override: Vec<IdentityCandidate>,
}

impl FakeDirectory {
    pub fn with_patients(patients: Vec<FakePatient>) -> Self {
        Self {
            patients,
            ..Self::default()
        }
    }

    pub fn search_log(&self) -> Vec<(SearchMode, String)> {
        self.searches.lock().unwrap().clone()
    }

    pub fn update_log(&self) -> Vec<DocumentUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmrDirectory for FakeDirectory {
    async fn login(&self) -> FlowResult<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_login {
            Err(FlowError::Session("login failed after 3 attempts".to_string()))
        } else {
            Ok(())
        }
    }

    async fn search(&self, mode: SearchMode, query: &str) -> FlowResult<Vec<IdentityCandidate>> {
        let keyword = mode.keyword(query);
        self.searches.lock().unwrap().push((mode, keyword.clone()));

        if mode == SearchMode::DemographicNo && !self.lookup_override.is_empty() {
            return Ok(self
                .lookup_override
                .iter()
                .filter(|c| c.demographic_no == keyword)
                .cloned()
                .collect());
        }

        Ok(self
            .patients
            .iter()
            .filter(|p| p.matches(mode, &keyword))
            .map(|p| p.candidate.clone())
            .collect())
    }

    async fn provider_roster(&self) -> FlowResult<Vec<ProviderEntry>> {
        Ok(self.roster.clone())
    }

    async fn update_document(&self, update: &DocumentUpdate) -> FlowResult<bool> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(!self.reject_updates)
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Model replying by the first rule whose needle occurs in the prompt.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, String)>,
    fallback: String,
    latency: Option<Duration>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            fallback: "False".to_string(),
            ..Self::default()
        }
    }

    pub fn reply(mut self, needle: &str, answer: &str) -> Self {
        self.rules.push((needle.to_string(), answer.to_string()));
        self
    }

    /// Delay every completion, for interrupting a run mid-step.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn prompt_log(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _temperature: f32, _top_p: f32) -> FlowResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Inbox over a fixed item list.
#[derive(Default)]
pub struct FakeSource {
    pub items: Vec<QueueItem>,
    pub content: Vec<u8>,
    pub fail_fetch: bool,
    pub fetches: AtomicUsize,
    pub skipped: Mutex<Vec<QueueItem>>,
}

impl FakeSource {
    pub fn new(items: Vec<QueueItem>, content: &[u8]) -> Self {
        Self {
            items,
            content: content.to_vec(),
            ..Self::default()
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn next_after(&self, _queue: QueueKind, cursor: &Cursor) -> FlowResult<Option<QueueItem>> {
        Ok(self.items.iter().find(|i| cursor.admits(i)).cloned())
    }

    async fn fetch(&self, _item: &QueueItem) -> FlowResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            Err(FlowError::Transport("connection reset".to_string()))
        } else {
            Ok(self.content.clone())
        }
    }

    async fn mark_skipped(&self, item: &QueueItem) -> FlowResult<()> {
        self.skipped.lock().unwrap().push(item.clone());
        Ok(())
    }
}

/// Extractor returning the bytes as text.
pub struct EchoExtractor;

#[async_trait]
impl TextExtractor for EchoExtractor {
    async fn extract(&self, bytes: &[u8]) -> FlowResult<String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

pub fn services(directory: Arc<FakeDirectory>, model: Arc<ScriptedModel>) -> Services {
    Services {
        directory,
        model,
        extractor: Arc::new(EchoExtractor),
    }
}

/// Settings with one-word prompts so scripted replies can key on them.
pub const SETTINGS_FIXTURE: &str = r#"
workflow:
  steps:
    - name: extract_text
      true_next: get_category_types
      false_next: exit
    - name: get_category_types
      true_next: get_category_type
      false_next: exit
    - name: get_category_type
      true_next: get_document_description
      false_next: exit
    - name: get_document_description
      true_next: resolve_patient
      false_next: resolve_patient
    - name: resolve_patient
      true_next: get_provider
      false_next: unidentified_patient
    - name: unidentified_patient
      true_next: get_provider
      false_next: exit
    - name: get_provider
      true_next: update_document
      false_next: update_document
    - name: update_document
      true_next: exit
      false_next: exit
document_categories:
  - name: Lab
    default_tagger: 12
    tasks:
      - name: summary
        prompt: SUMMARIZE?
  - name: Consult
ai_prompts:
  get_patient_name: NAME?
  get_patient_dob: DOB?
  get_patient_hin: HIN?
  get_patient_result_filter: CONFIRM?
  get_provider: PROVIDER?
  category_types_prompt: TYPES?
  category_type_prompt: TYPE?
default_values:
  default_category: Other
  default_provider_tagging_id: 999
  default_error_manager_id: 42
  default_unidentified_patient_tagging_id: 1
  default_unidentified_patient_tagging_name: UNIDENTIFIED, PATIENT
  default_unidentified_patient_tagging_dob: 1900-01-01
"#;
