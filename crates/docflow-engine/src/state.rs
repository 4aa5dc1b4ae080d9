//! Run-scoped shared state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::outcome::StepOutcome;

/// A value stored in shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SharedValue {
    /// Boolean result of a step or a semantic flag.
    Flag(bool),
    /// Boolean result with a payload.
    Payload(bool, serde_json::Value),
}

impl SharedValue {
    /// Boolean part of the value.
    pub fn flag(&self) -> bool {
        match self {
            SharedValue::Flag(b) => *b,
            SharedValue::Payload(b, _) => *b,
        }
    }

    /// Payload part of the value, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            SharedValue::Flag(_) => None,
            SharedValue::Payload(_, v) => Some(v),
        }
    }

    /// Payload rendered as a string.
    pub fn payload_str(&self) -> Option<String> {
        self.payload().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl From<StepOutcome> for SharedValue {
    fn from(outcome: StepOutcome) -> Self {
        match outcome {
            StepOutcome::Flag(b) => SharedValue::Flag(b),
            StepOutcome::WithPayload(b, v) => SharedValue::Payload(b, v),
        }
    }
}

/// Key/value state shared between the steps of one run.
///
/// Keys are step names or semantic labels. The engine clears it at the start
/// of every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    entries: HashMap<String, SharedValue>,
}

impl SharedState {
    /// Create an empty shared state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: SharedValue) {
        self.entries.insert(key.into(), value);
    }

    /// Set a boolean flag.
    pub fn set_flag(&mut self, key: impl Into<String>, flag: bool) {
        self.set(key, SharedValue::Flag(flag));
    }

    /// Set a true value carrying a payload.
    pub fn set_payload(&mut self, key: impl Into<String>, payload: impl Into<serde_json::Value>) {
        self.set(key, SharedValue::Payload(true, payload.into()));
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&SharedValue> {
        self.entries.get(key)
    }

    /// Get a payload as a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.entries.get(key).and_then(|v| v.payload_str())
    }

    /// Check whether a key is set.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_state_set_get() {
        let mut state = SharedState::new();
        state.set_flag("extract_text", true);
        state.set_payload("get_category_type", "lab");

        assert_eq!(state.get("extract_text"), Some(&SharedValue::Flag(true)));
        assert_eq!(state.get_str("get_category_type"), Some("lab".to_string()));
        assert_eq!(state.get_str("extract_text"), None);
        assert_eq!(state.get("missing"), None);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_shared_state_clear() {
        let mut state = SharedState::new();
        state.set_flag("a", false);
        state.clear();
        assert!(state.is_empty());
        assert!(!state.contains("a"));
    }

    #[test]
    fn test_shared_value_from_outcome() {
        let value: SharedValue = StepOutcome::WithPayload(false, serde_json::json!(42)).into();
        assert!(!value.flag());
        assert_eq!(value.payload_str(), Some("42".to_string()));
    }
}
