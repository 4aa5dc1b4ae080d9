//! Run context contract.

use async_trait::async_trait;

use crate::state::SharedState;

/// Context passed to every capability during a run.
///
/// The engine only needs shared state, an identifier for log correlation and
/// a way to release run-scoped resources; everything else belongs to the
/// implementing type.
#[async_trait]
pub trait FlowContext: Send {
    /// Shared state of the current run.
    fn shared_state(&self) -> &SharedState;

    /// Mutable shared state of the current run.
    fn shared_state_mut(&mut self) -> &mut SharedState;

    /// Identifier of the unit of work, used in log fields.
    fn run_id(&self) -> String;

    /// Release run-scoped resources such as the network session.
    async fn close(&mut self);
}
