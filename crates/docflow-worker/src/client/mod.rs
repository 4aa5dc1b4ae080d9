//! Outbound collaborators.
//!
//! Each collaborator is a trait with one HTTP implementation; the EMR
//! directory and document source share one logged-in session.

mod emr;
mod extract;
mod llm;
mod session;
mod source;

pub use emr::{
    DocumentUpdate, EmrDirectory, HttpEmrDirectory, IdentityCandidate, ProviderEntry, SearchMode,
};
pub use extract::{CommandExtractor, PlainTextExtractor, TextExtractor};
pub use llm::{ChatCompletionClient, LanguageModel};
pub use session::EmrSession;
pub use source::{DocumentSource, HttpDocumentSource};

/// Accept a JSON string or number as an identifier.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected identifier, got {}",
            other
        ))),
    }
}
