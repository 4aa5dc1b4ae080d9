//! DocFlow Engine Library
//!
//! Declarative step-graph execution for document intake workflows.
//!
//! This crate provides:
//! - Workflow definitions parsed from YAML and validated at startup
//! - A capability registry mapping step names to async functions
//! - Run-scoped shared state and step outcomes
//! - The `WorkflowEngine`, which runs each step at most once per run
//!
//! ## Example
//!
//! ```ignore
//! use docflow_engine::{CapabilityRegistry, WorkflowDefinition, WorkflowEngine};
//!
//! let definition = WorkflowDefinition::from_yaml(yaml)?;
//! let mut registry = CapabilityRegistry::new();
//! registry.register_fn("extract_text", extract_text);
//! definition.validate_against(&registry)?;
//!
//! let engine = WorkflowEngine::new(definition, Arc::new(registry));
//! let report = engine.execute_workflow(&mut ctx).await?;
//! ```

pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod state;

pub use context::FlowContext;
pub use definition::{WorkflowDefinition, WorkflowStep, EXIT};
pub use engine::{RunReport, Termination, WorkflowEngine};
pub use error::{FlowError, FlowResult};
pub use outcome::StepOutcome;
pub use registry::{Capability, CapabilityFn, CapabilityRegistry};
pub use state::{SharedState, SharedValue};
