//! Document category classification.

use docflow_engine::FlowResult;

use super::Prompter;
use crate::settings::{DefaultValues, DocumentCategory, Prompts};

const TYPES_PROMPT: &str = "category_types_prompt";
const TYPE_PROMPT: &str = "category_type_prompt";

/// Two-pass classifier: a descriptive pass over the evidence, then a forced
/// single-category pass over that description.
pub struct CategoryClassifier<'a> {
    prompter: Prompter<'a>,
    prompts: &'a Prompts,
    categories: &'a [DocumentCategory],
    defaults: &'a DefaultValues,
}

impl<'a> CategoryClassifier<'a> {
    pub fn new(
        prompter: Prompter<'a>,
        prompts: &'a Prompts,
        categories: &'a [DocumentCategory],
        defaults: &'a DefaultValues,
    ) -> Self {
        Self {
            prompter,
            prompts,
            categories,
            defaults,
        }
    }

    /// Free-text assessment of which categories the document could belong to.
    pub async fn describe(&self, evidence: &str) -> FlowResult<String> {
        self.prompter
            .ask_about(evidence, self.prompts.get(TYPES_PROMPT))
            .await
    }

    /// Single category name for a prior assessment.
    pub async fn classify(&self, assessment: &str) -> FlowResult<String> {
        let prompt = format!(
            "EMR Document content : {}.\n{}",
            assessment,
            self.prompts.get(TYPE_PROMPT)
        );
        let answer = self.prompter.ask(&prompt).await?;
        let category = match_category(&answer, self.categories, self.defaults);
        tracing::debug!(answer = %answer, category = %category, "Category classified");
        Ok(category)
    }
}

/// Category named by the answer, or the default category lowercased.
///
/// Words are checked in order; the first word equal to or starting with a
/// configured name (case-insensitive) wins, with configured order breaking
/// ties within a word.
pub fn match_category(
    answer: &str,
    categories: &[DocumentCategory],
    defaults: &DefaultValues,
) -> String {
    let text = answer.replace('.', "");

    for word in text.split_whitespace() {
        let word = word.replace(['"', '\''], "").to_lowercase();
        for category in categories {
            let name = category.name.to_lowercase();
            if word.starts_with(&name) {
                return category.name.clone();
            }
        }
    }

    defaults.category().to_lowercase()
}

/// Configured category by case-insensitive name.
pub fn find_category<'c>(categories: &'c [DocumentCategory], name: &str) -> Option<&'c DocumentCategory> {
    let name = name.trim();
    categories
        .iter()
        .find(|c| c.name.trim().eq_ignore_ascii_case(name))
}
