//! Responsible provider selection.

use regex::Regex;
use std::sync::OnceLock;

use docflow_engine::{FlowError, FlowResult};

use super::Prompter;
use crate::client::{EmrDirectory, ProviderEntry};
use crate::settings::{DefaultValues, Prompts};

const PROVIDER_PROMPT: &str = "get_provider";

/// Outcome of provider selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResolution {
    /// The model named a provider number.
    Resolved(String),
    /// No usable answer; `error_manager` is set when the fallback should be
    /// reported to a configured error manager.
    Fallback {
        provider_id: String,
        error_manager: Option<String>,
    },
}

impl ProviderResolution {
    pub fn provider_id(&self) -> &str {
        match self {
            ProviderResolution::Resolved(id) => id,
            ProviderResolution::Fallback { provider_id, .. } => provider_id,
        }
    }
}

pub struct ProviderResolver<'a> {
    directory: &'a dyn EmrDirectory,
    prompter: Prompter<'a>,
    prompts: &'a Prompts,
    defaults: &'a DefaultValues,
}

impl<'a> ProviderResolver<'a> {
    pub fn new(
        directory: &'a dyn EmrDirectory,
        prompter: Prompter<'a>,
        prompts: &'a Prompts,
        defaults: &'a DefaultValues,
    ) -> Self {
        Self {
            directory,
            prompter,
            prompts,
            defaults,
        }
    }

    pub async fn resolve(&self, evidence: &str) -> FlowResult<ProviderResolution> {
        let roster = match self.directory.provider_roster().await {
            Ok(roster) => roster,
            Err(FlowError::Data(msg)) => {
                tracing::warn!(error = %msg, "Provider roster unreadable, treating as empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let default_id = self.defaults.provider_tagging_id().to_string();
        if roster.is_empty() {
            return Ok(ProviderResolution::Fallback {
                provider_id: default_id,
                error_manager: None,
            });
        }

        let instruction = format!("{}{}", self.prompts.get(PROVIDER_PROMPT), render_roster(&roster)?);
        let answer = self.prompter.ask_about(evidence, &instruction).await?;

        match first_number(&answer) {
            Some(id) => Ok(ProviderResolution::Resolved(id)),
            None => {
                tracing::warn!(answer = %answer, "No provider number in answer");
                Ok(ProviderResolution::Fallback {
                    provider_id: default_id,
                    error_manager: self.defaults.error_manager_id().map(str::to_string),
                })
            }
        }
    }
}

fn render_roster(roster: &[ProviderEntry]) -> FlowResult<String> {
    Ok(serde_json::to_string(roster)?)
}

/// First standalone integer in the answer, without leading zeros.
pub fn first_number(answer: &str) -> Option<String> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER.get_or_init(|| Regex::new(r"\b\d+\b").unwrap());

    re.find(answer).map(|m| {
        let trimmed = m.as_str().trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    })
}
