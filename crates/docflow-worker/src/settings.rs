//! Domain settings loaded from the YAML settings document.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use docflow_engine::{FlowError, FlowResult, WorkflowDefinition, WorkflowStep};

use crate::intake::GiveUpPolicy;
use crate::queue::QueueKind;

/// Read-only view over the settings document with dotted-key lookup.
#[derive(Debug, Clone)]
pub struct Settings {
    root: serde_yaml::Value,
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Configuration(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text.
    pub fn from_yaml(content: &str) -> FlowResult<Self> {
        let root: serde_yaml::Value = serde_yaml::from_str(content)?;
        Ok(Self { root })
    }

    /// Raw value at a dotted key such as `emr.base_url`.
    pub fn value(&self, dotted_key: &str) -> Option<&serde_yaml::Value> {
        dotted_key
            .split('.')
            .try_fold(&self.root, |node, key| node.get(key))
            .filter(|v| !v.is_null())
    }

    /// Typed value at a dotted key, or `default` when absent or mistyped.
    pub fn get<T: DeserializeOwned>(&self, dotted_key: &str, default: T) -> T {
        match self.value(dotted_key) {
            Some(v) => match serde_yaml::from_value(v.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(key = %dotted_key, error = %e, "Setting has unexpected type, using default");
                    default
                }
            },
            None => default,
        }
    }

    /// Deserialize a whole section; a missing section deserializes from an empty mapping.
    pub fn section<T: DeserializeOwned>(&self, dotted_key: &str) -> FlowResult<T> {
        let value = self
            .value(dotted_key)
            .cloned()
            .unwrap_or_else(|| serde_yaml::Value::Mapping(Default::default()));
        serde_yaml::from_value(value)
            .map_err(|e| FlowError::Configuration(format!("invalid section '{}': {}", dotted_key, e)))
    }

    /// Workflow definition under `workflow.steps`.
    pub fn workflow(&self) -> FlowResult<WorkflowDefinition> {
        let steps: Vec<WorkflowStep> = match self.value("workflow.steps") {
            Some(v) => serde_yaml::from_value(v.clone())?,
            None => Vec::new(),
        };
        WorkflowDefinition::new(steps)
    }

    pub fn emr(&self) -> FlowResult<EmrSettings> {
        self.section("emr")
    }

    pub fn ai(&self) -> FlowResult<AiSettings> {
        self.section("ai")
    }

    pub fn file_processing(&self) -> FlowResult<FileProcessing> {
        self.section("file_processing")
    }

    pub fn ocr(&self) -> FlowResult<OcrSettings> {
        self.section("ocr")
    }

    /// Queue the worker drains, from `inbox.queue`.
    pub fn queue(&self) -> QueueKind {
        self.get("inbox.queue", QueueKind::Pending)
    }

    /// Configured document categories, in order.
    pub fn document_categories(&self) -> FlowResult<Vec<DocumentCategory>> {
        match self.value("document_categories") {
            Some(v) => serde_yaml::from_value(v.clone()).map_err(|e| {
                FlowError::Configuration(format!("invalid document_categories: {}", e))
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Prompt texts keyed by purpose.
    pub fn prompts(&self) -> Prompts {
        Prompts(self.get("ai_prompts", HashMap::new()))
    }

    /// Fallback identifiers and names.
    pub fn default_values(&self) -> DefaultValues {
        let raw: HashMap<String, serde_yaml::Value> = self.get("default_values", HashMap::new());
        DefaultValues(
            raw.into_iter()
                .filter_map(|(k, v)| scalar_to_string(&v).map(|s| (k, s)))
                .collect(),
        )
    }
}

/// EMR connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmrSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Second factor some EMR deployments require at login.
    #[serde(default)]
    pub pin: Option<String>,

    #[serde(default = "default_true", rename = "verify-HTTPS", alias = "verify_https")]
    pub verify_https: bool,

    /// Login attempt ceiling.
    #[serde(default = "default_login_attempts")]
    pub login_max_attempts: u32,

    /// First backoff delay between login attempts, in milliseconds.
    #[serde(default = "default_login_delay_ms")]
    pub login_initial_delay_ms: u64,

    /// Backoff cap, in milliseconds.
    #[serde(default = "default_login_max_delay_ms")]
    pub login_max_delay_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/oscar".to_string()
}

fn default_true() -> bool {
    true
}

fn default_login_attempts() -> u32 {
    5
}

fn default_login_delay_ms() -> u64 {
    500
}

fn default_login_max_delay_ms() -> u64 {
    10_000
}

/// Language model endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AiSettings {
    #[serde(default = "default_ai_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_sampling")]
    pub temperature: f32,

    #[serde(default = "default_sampling")]
    pub top_p: f32,
}

fn default_ai_url() -> String {
    "http://127.0.0.1:5000/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_sampling() -> f32 {
    0.1
}

/// Retry budget and poison-item handling.
#[derive(Debug, Clone, Deserialize)]
pub struct FileProcessing {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub give_up_policy: GiveUpPolicy,
}

fn default_max_retries() -> u32 {
    3
}

/// External text extraction command.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrSettings {
    /// Program receiving the document path as its last argument; text is read
    /// from stdout. Documents are treated as plain text when unset.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_ocr_timeout")]
    pub timeout_seconds: u64,
}

fn default_ocr_timeout() -> u64 {
    120
}

/// One configured document category.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DocumentCategory {
    pub name: String,

    /// Provider tagged on every document of this category.
    #[serde(default, deserialize_with = "de_opt_id")]
    pub default_tagger: Option<String>,

    /// Chained description prompts.
    #[serde(default)]
    pub tasks: Vec<DescriptionTask>,
}

/// One link of a description prompt chain.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DescriptionTask {
    pub name: String,
    pub prompt: String,
}

/// Prompt texts keyed by purpose.
#[derive(Debug, Clone, Default)]
pub struct Prompts(HashMap<String, String>);

impl Prompts {
    /// Prompt text for a key; empty when not configured.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn insert(&mut self, key: impl Into<String>, prompt: impl Into<String>) {
        self.0.insert(key.into(), prompt.into());
    }
}

/// Fallback values under `default_values`.
#[derive(Debug, Clone, Default)]
pub struct DefaultValues(HashMap<String, String>);

impl DefaultValues {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|s| !s.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Provider tagged when no provider could be resolved.
    pub fn provider_tagging_id(&self) -> &str {
        self.get("default_provider_tagging_id").unwrap_or("")
    }

    /// Provider recorded as error manager on provider resolution failure.
    pub fn error_manager_id(&self) -> Option<&str> {
        self.get("default_error_manager_id")
    }

    /// Category used when classification finds no match.
    pub fn category(&self) -> &str {
        self.get("default_category").unwrap_or("")
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_to_string))
}
