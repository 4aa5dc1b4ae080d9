//! Chained description prompts.

use docflow_engine::FlowResult;

use super::{evidence_prompt, Prompter};
use crate::settings::DocumentCategory;

/// Shared state key prefix for intermediate description answers.
pub const DESCRIPTION_KEY_PREFIX: &str = "get_document_description_";

/// Final description plus every intermediate answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub text: String,
    /// `(shared state key, answer)` per task, in order.
    pub steps: Vec<(String, String)>,
}

pub struct DescriptionWriter<'a> {
    prompter: Prompter<'a>,
}

impl<'a> DescriptionWriter<'a> {
    pub fn new(prompter: Prompter<'a>) -> Self {
        Self { prompter }
    }

    /// Run the category's task chain. The first task sees the evidence, each
    /// later task the previous answer. `None` when the category has no tasks.
    pub async fn write(&self, category: &DocumentCategory, evidence: &str) -> FlowResult<Option<Description>> {
        if category.tasks.is_empty() {
            return Ok(None);
        }

        let mut previous = evidence_prompt(evidence, "");
        let mut steps = Vec::with_capacity(category.tasks.len());
        for task in &category.tasks {
            let prompt = format!("{}{}", previous, task.prompt);
            previous = self.prompter.ask(&prompt).await?;
            steps.push((format!("{}{}", DESCRIPTION_KEY_PREFIX, task.name), previous.clone()));
        }

        Ok(Some(Description {
            text: previous,
            steps,
        }))
    }
}
