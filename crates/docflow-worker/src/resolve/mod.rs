//! Resolution helpers driven by the language model.
//!
//! Every resolver asks one or more prompts over the evidence text and turns
//! the free-text answers into typed results, falling back to configured
//! defaults when an answer cannot be used.

pub mod category;
pub mod description;
pub mod identity;
pub mod provider;

pub use category::CategoryClassifier;
pub use description::{Description, DescriptionWriter};
pub use identity::{IdentityResolution, IdentityResolver, ResolutionBasis, Signal};
pub use provider::{ProviderResolution, ProviderResolver};

use docflow_engine::FlowResult;

use crate::client::LanguageModel;

/// Sampling parameters sent with every completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.1,
        }
    }
}

/// Language model bound to fixed sampling parameters.
#[derive(Clone, Copy)]
pub struct Prompter<'a> {
    model: &'a dyn LanguageModel,
    sampling: Sampling,
}

impl<'a> Prompter<'a> {
    pub fn new(model: &'a dyn LanguageModel, sampling: Sampling) -> Self {
        Self { model, sampling }
    }

    pub async fn ask(&self, prompt: &str) -> FlowResult<String> {
        self.model
            .complete(prompt, self.sampling.temperature, self.sampling.top_p)
            .await
    }

    /// Ask an instruction about the evidence text.
    pub async fn ask_about(&self, evidence: &str, instruction: &str) -> FlowResult<String> {
        self.ask(&evidence_prompt(evidence, instruction)).await
    }
}

/// Evidence followed by an instruction.
pub fn evidence_prompt(evidence: &str, instruction: &str) -> String {
    format!("\n{}.\n{}", evidence, instruction)
}
