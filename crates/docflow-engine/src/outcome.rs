//! Step outcome types.

use serde::{Deserialize, Serialize};

/// Value returned by a capability.
///
/// The boolean selects the branch; a payload, when present, is stored in
/// shared state under the step name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepOutcome {
    /// Plain branch condition.
    Flag(bool),
    /// Branch condition plus a payload for later steps.
    WithPayload(bool, serde_json::Value),
}

impl StepOutcome {
    /// Create a true outcome.
    pub fn success() -> Self {
        StepOutcome::Flag(true)
    }

    /// Create a false outcome.
    pub fn failure() -> Self {
        StepOutcome::Flag(false)
    }

    /// Create a true outcome carrying a payload.
    pub fn with_payload(payload: impl Into<serde_json::Value>) -> Self {
        StepOutcome::WithPayload(true, payload.into())
    }

    /// Branch condition.
    pub fn condition(&self) -> bool {
        match self {
            StepOutcome::Flag(b) => *b,
            StepOutcome::WithPayload(b, _) => *b,
        }
    }

    /// Payload, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            StepOutcome::Flag(_) => None,
            StepOutcome::WithPayload(_, v) => Some(v),
        }
    }
}

impl From<bool> for StepOutcome {
    fn from(b: bool) -> Self {
        StepOutcome::Flag(b)
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Flag(b) => write!(f, "{}", b),
            StepOutcome::WithPayload(b, _) => write!(f, "{} (with payload)", b),
        }
    }
}
