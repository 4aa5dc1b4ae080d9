//! Workflow execution error types.

use thiserror::Error;

/// Errors that can occur while defining or executing a workflow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Step name has no registered capability, or the definition is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection failure or timeout on an outbound call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed payload returned by a collaborator.
    #[error("Data error: {0}")]
    Data(String),

    /// Persisted state could not be read or written.
    #[error("State error: {0}")]
    State(String),

    /// Login could not be established within the attempt ceiling.
    #[error("Session error: {0}")]
    Session(String),
}

impl FlowError {
    /// Returns true if the error aborts the whole run.
    ///
    /// Data errors are absorbed by the engine as a false branch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlowError::Data(_))
    }

    /// Returns true for connection and timeout failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::Transport(_) | FlowError::Session(_))
    }
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        FlowError::State(e.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Data(e.to_string())
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(e: serde_yaml::Error) -> Self {
        FlowError::Configuration(e.to_string())
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FlowError::Data(e.to_string())
        } else {
            FlowError::Transport(e.to_string())
        }
    }
}

/// Result type alias using FlowError.
pub type FlowResult<T> = Result<T, FlowError>;
