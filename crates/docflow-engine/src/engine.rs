//! Workflow execution.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::FlowContext;
use crate::definition::{WorkflowDefinition, EXIT};
use crate::error::{FlowError, FlowResult};
use crate::outcome::StepOutcome;
use crate::registry::CapabilityRegistry;
use crate::state::SharedValue;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A step transitioned to `exit`.
    Exit,
    /// A step transitioned to an unknown or already executed step.
    UnresolvedTransition {
        /// Step that produced the transition.
        from: String,
        /// Target that could not be resolved.
        target: String,
    },
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Executed step names in order.
    pub visited: Vec<String>,
    /// How the run ended.
    pub termination: Termination,
}

impl RunReport {
    /// Returns true if the run reached `exit`.
    pub fn reached_exit(&self) -> bool {
        self.termination == Termination::Exit
    }
}

/// Executes a workflow definition against a run context.
pub struct WorkflowEngine<C> {
    definition: WorkflowDefinition,
    registry: Arc<CapabilityRegistry<C>>,
}

impl<C: FlowContext + 'static> WorkflowEngine<C> {
    /// Create a new engine.
    pub fn new(definition: WorkflowDefinition, registry: Arc<CapabilityRegistry<C>>) -> Self {
        Self {
            definition,
            registry,
        }
    }

    /// Workflow definition driven by this engine.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Run the workflow once from the entry step.
    ///
    /// Each step runs at most once. Data errors from a capability select the
    /// false branch; any other error aborts the run. The context is closed on
    /// every path.
    pub async fn execute_workflow(&self, ctx: &mut C) -> FlowResult<RunReport> {
        let run_id = ctx.run_id();
        ctx.shared_state_mut().clear();

        let steps = self.definition.steps();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut order: Vec<String> = Vec::new();
        let mut current = 0usize;

        tracing::info!(document_id = %run_id, entry = %steps[0].name, "Starting workflow");

        let termination = loop {
            let step = &steps[current];
            visited.insert(current);
            order.push(step.name.clone());

            tracing::debug!(document_id = %run_id, step = %step.name, "Executing step");

            let condition = match self.run_step(&step.name, ctx).await {
                Ok(outcome) => {
                    let condition = outcome.condition();
                    ctx.shared_state_mut()
                        .set(step.name.clone(), SharedValue::from(outcome));
                    condition
                }
                Err(FlowError::Data(msg)) => {
                    tracing::warn!(
                        document_id = %run_id,
                        step = %step.name,
                        error = %msg,
                        "Step returned malformed data, taking false branch"
                    );
                    ctx.shared_state_mut().set_flag(step.name.clone(), false);
                    false
                }
                Err(e) => {
                    tracing::error!(
                        document_id = %run_id,
                        step = %step.name,
                        error = %e,
                        "Workflow aborted"
                    );
                    ctx.close().await;
                    return Err(e);
                }
            };

            let next = step.next(condition);
            tracing::debug!(
                document_id = %run_id,
                step = %step.name,
                condition,
                next = %next,
                "Step completed"
            );

            if next == EXIT {
                break Termination::Exit;
            }

            match self.definition.position(next) {
                Some(idx) if !visited.contains(&idx) => current = idx,
                Some(_) => {
                    tracing::warn!(
                        document_id = %run_id,
                        step = %step.name,
                        target = %next,
                        "Transition target already executed in this run, ending workflow"
                    );
                    break Termination::UnresolvedTransition {
                        from: step.name.clone(),
                        target: next.to_string(),
                    };
                }
                None => {
                    tracing::warn!(
                        document_id = %run_id,
                        step = %step.name,
                        target = %next,
                        "Transition target not found, ending workflow"
                    );
                    break Termination::UnresolvedTransition {
                        from: step.name.clone(),
                        target: next.to_string(),
                    };
                }
            }
        };

        ctx.close().await;
        tracing::info!(document_id = %run_id, steps = order.len(), "Workflow finished");

        Ok(RunReport {
            visited: order,
            termination,
        })
    }

    async fn run_step(&self, name: &str, ctx: &mut C) -> FlowResult<StepOutcome> {
        self.registry.invoke(name, ctx).await
    }
}

impl<C> std::fmt::Debug for WorkflowEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("definition", &self.definition)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestContext;
    use crate::definition::WorkflowStep;
    use futures::future::BoxFuture;

    fn ok_true(ctx: &mut TestContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
        Box::pin(async move {
            ctx.calls.push("ok_true".to_string());
            Ok(StepOutcome::success())
        })
    }

    fn ok_false(ctx: &mut TestContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
        Box::pin(async move {
            ctx.calls.push("ok_false".to_string());
            Ok(StepOutcome::failure())
        })
    }

    fn category(ctx: &mut TestContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
        Box::pin(async move {
            ctx.calls.push("category".to_string());
            Ok(StepOutcome::with_payload("lab"))
        })
    }

    fn bad_data(ctx: &mut TestContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
        Box::pin(async move {
            ctx.calls.push("bad_data".to_string());
            Err(FlowError::Data("unexpected token".to_string()))
        })
    }

    fn unreachable_host(ctx: &mut TestContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
        Box::pin(async move {
            ctx.calls.push("unreachable_host".to_string());
            Err(FlowError::Transport("connection refused".to_string()))
        })
    }

    fn registry() -> Arc<CapabilityRegistry<TestContext>> {
        let mut registry: CapabilityRegistry<TestContext> = CapabilityRegistry::new();
        registry.register_fn("a", ok_true);
        registry.register_fn("b", ok_false);
        registry.register_fn("c", category);
        registry.register_fn("data", bad_data);
        registry.register_fn("transport", unreachable_host);
        Arc::new(registry)
    }

    fn engine(steps: Vec<WorkflowStep>) -> WorkflowEngine<TestContext> {
        WorkflowEngine::new(WorkflowDefinition::new(steps).unwrap(), registry())
    }

    #[tokio::test]
    async fn test_linear_run_reaches_exit() {
        let engine = engine(vec![
            WorkflowStep::new("a", "c", "exit"),
            WorkflowStep::new("c", "b", "exit"),
            WorkflowStep::new("b", "exit", "exit"),
        ]);

        let mut ctx = TestContext::default();
        let report = engine.execute_workflow(&mut ctx).await.unwrap();

        assert!(report.reached_exit());
        assert_eq!(report.visited, vec!["a", "c", "b"]);
        assert!(ctx.closed);
        assert_eq!(ctx.state.get_str("c"), Some("lab".to_string()));
        assert_eq!(ctx.state.get("b"), Some(&SharedValue::Flag(false)));
    }

    #[tokio::test]
    async fn test_false_branch_followed() {
        let engine = engine(vec![
            WorkflowStep::new("b", "a", "c"),
            WorkflowStep::new("a", "exit", "exit"),
            WorkflowStep::new("c", "exit", "exit"),
        ]);

        let mut ctx = TestContext::default();
        let report = engine.execute_workflow(&mut ctx).await.unwrap();
        assert_eq!(report.visited, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_cycle_visits_each_step_once() {
        let engine = engine(vec![
            WorkflowStep::new("a", "c", "exit"),
            WorkflowStep::new("c", "a", "exit"),
        ]);

        let mut ctx = TestContext::default();
        let report = engine.execute_workflow(&mut ctx).await.unwrap();

        assert_eq!(report.visited, vec!["a", "c"]);
        assert_eq!(
            report.termination,
            Termination::UnresolvedTransition {
                from: "c".to_string(),
                target: "a".to_string()
            }
        );
        assert_eq!(ctx.calls, vec!["ok_true", "category"]);
        assert!(ctx.closed);
    }

    #[tokio::test]
    async fn test_self_loop_terminates() {
        let engine = engine(vec![WorkflowStep::new("a", "a", "a")]);

        let mut ctx = TestContext::default();
        let report = engine.execute_workflow(&mut ctx).await.unwrap();
        assert_eq!(report.visited, vec!["a"]);
        assert!(!report.reached_exit());
    }

    #[tokio::test]
    async fn test_unknown_target_ends_run() {
        let engine = engine(vec![WorkflowStep::new("a", "nowhere", "exit")]);

        let mut ctx = TestContext::default();
        let report = engine.execute_workflow(&mut ctx).await.unwrap();
        assert_eq!(
            report.termination,
            Termination::UnresolvedTransition {
                from: "a".to_string(),
                target: "nowhere".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unregistered_step_is_configuration_error() {
        let engine = engine(vec![
            WorkflowStep::new("a", "ghost", "exit"),
            WorkflowStep::new("ghost", "exit", "exit"),
        ]);

        let mut ctx = TestContext::default();
        let result = engine.execute_workflow(&mut ctx).await;
        assert!(matches!(result, Err(FlowError::Configuration(_))));
        assert!(ctx.closed);
    }

    #[tokio::test]
    async fn test_data_error_takes_false_branch() {
        let engine = engine(vec![
            WorkflowStep::new("data", "a", "c"),
            WorkflowStep::new("a", "exit", "exit"),
            WorkflowStep::new("c", "exit", "exit"),
        ]);

        let mut ctx = TestContext::default();
        let report = engine.execute_workflow(&mut ctx).await.unwrap();
        assert_eq!(report.visited, vec!["data", "c"]);
        assert_eq!(ctx.state.get("data"), Some(&SharedValue::Flag(false)));
    }

    #[tokio::test]
    async fn test_transport_error_aborts_and_closes() {
        let engine = engine(vec![
            WorkflowStep::new("a", "transport", "exit"),
            WorkflowStep::new("transport", "c", "c"),
            WorkflowStep::new("c", "exit", "exit"),
        ]);

        let mut ctx = TestContext::default();
        let result = engine.execute_workflow(&mut ctx).await;

        assert!(matches!(result, Err(FlowError::Transport(_))));
        assert_eq!(ctx.calls, vec!["ok_true", "unreachable_host"]);
        assert!(ctx.closed);
    }

    #[tokio::test]
    async fn test_shared_state_cleared_between_runs() {
        let engine = engine(vec![WorkflowStep::new("a", "exit", "exit")]);

        let mut ctx = TestContext::default();
        ctx.state.set_flag("left_over", true);
        engine.execute_workflow(&mut ctx).await.unwrap();

        assert!(!ctx.state.contains("left_over"));
        assert!(ctx.state.contains("a"));
    }
}
