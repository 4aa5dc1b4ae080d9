//! Workflow definition model and YAML parser.
//!
//! A workflow is an ordered list of steps. Each step names a capability and
//! the steps to continue with on a true or false result. The first step is
//! the entry point and `exit` is the only terminal target.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{FlowError, FlowResult};
use crate::registry::CapabilityRegistry;

/// Terminal transition target.
pub const EXIT: &str = "exit";

/// One node of the step graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name; must match a registered capability.
    pub name: String,

    /// Target when the capability returns true.
    pub true_next: String,

    /// Target when the capability returns false.
    pub false_next: String,
}

impl WorkflowStep {
    /// Create a new step.
    pub fn new(
        name: impl Into<String>,
        true_next: impl Into<String>,
        false_next: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            true_next: true_next.into(),
            false_next: false_next.into(),
        }
    }

    /// Target selected by a branch condition.
    pub fn next(&self, condition: bool) -> &str {
        if condition {
            &self.true_next
        } else {
            &self.false_next
        }
    }
}

/// Immutable, validated list of workflow steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Build a definition from steps, validating it.
    pub fn new(steps: Vec<WorkflowStep>) -> FlowResult<Self> {
        let definition = Self { steps };
        definition.validate()?;
        Ok(definition)
    }

    /// Parse a YAML document of the form `steps: [{name, true_next, false_next}, ...]`.
    pub fn from_yaml(yaml_content: &str) -> FlowResult<Self> {
        #[derive(Deserialize)]
        struct Document {
            steps: Vec<WorkflowStep>,
        }

        let document: Document = serde_yaml::from_str(yaml_content)?;
        Self::new(document.steps)
    }

    /// All steps in definition order.
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Entry step.
    pub fn entry(&self) -> &WorkflowStep {
        &self.steps[0]
    }

    /// Index of a step by name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Transition targets that name neither a step nor `exit`.
    ///
    /// These are allowed; a run reaching one ends with a warning.
    pub fn dangling_targets(&self) -> Vec<&str> {
        let names: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        let mut dangling = Vec::new();
        for step in &self.steps {
            for target in [step.true_next.as_str(), step.false_next.as_str()] {
                if target != EXIT && !names.contains(target) && !dangling.contains(&target) {
                    dangling.push(target);
                }
            }
        }
        dangling
    }

    /// Check that every step has a registered capability.
    pub fn validate_against<C: Send + 'static>(
        &self,
        registry: &CapabilityRegistry<C>,
    ) -> FlowResult<()> {
        let missing: Vec<&str> = self
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| !registry.has(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Configuration(format!(
                "steps without a registered capability: {}",
                missing.join(", ")
            )))
        }
    }

    fn validate(&self) -> FlowResult<()> {
        if self.steps.is_empty() {
            return Err(FlowError::Configuration(
                "workflow must have at least one step".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(FlowError::Configuration(format!(
                    "steps[{}]: step name is empty",
                    idx
                )));
            }

            if step.name == EXIT {
                return Err(FlowError::Configuration(format!(
                    "steps[{}]: '{}' is reserved as the terminal target",
                    idx, EXIT
                )));
            }

            if !seen.insert(step.name.as_str()) {
                return Err(FlowError::Configuration(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }

            if step.true_next.trim().is_empty() || step.false_next.trim().is_empty() {
                return Err(FlowError::Configuration(format!(
                    "step '{}': transition target is empty",
                    step.name
                )));
            }
        }

        Ok(())
    }
}
