//! Capability registry and dispatch.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};
use crate::outcome::StepOutcome;

/// A unit of work bound to a step name.
#[async_trait]
pub trait Capability<C>: Send + Sync {
    /// Run the capability against the run context.
    async fn invoke(&self, ctx: &mut C) -> FlowResult<StepOutcome>;
}

/// Plain function signature accepted by [`CapabilityRegistry::register_fn`].
pub type CapabilityFn<C> = for<'a> fn(&'a mut C) -> BoxFuture<'a, FlowResult<StepOutcome>>;

struct FnCapability<C> {
    f: CapabilityFn<C>,
}

#[async_trait]
impl<C: Send + 'static> Capability<C> for FnCapability<C> {
    async fn invoke(&self, ctx: &mut C) -> FlowResult<StepOutcome> {
        (self.f)(ctx).await
    }
}

/// Registry mapping step names to capabilities.
///
/// Built once at startup; the engine resolves every step name through it.
pub struct CapabilityRegistry<C> {
    capabilities: HashMap<String, Arc<dyn Capability<C>>>,
}

impl<C: Send + 'static> CapabilityRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Register a capability under a step name.
    pub fn register<T: Capability<C> + 'static>(&mut self, name: impl Into<String>, capability: T) {
        self.capabilities.insert(name.into(), Arc::new(capability));
    }

    /// Register a plain async function under a step name.
    pub fn register_fn(&mut self, name: impl Into<String>, f: CapabilityFn<C>) {
        self.register(name, FnCapability { f });
    }

    /// Get a capability by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability<C>>> {
        self.capabilities.get(name).cloned()
    }

    /// Check if a step name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// List all registered step names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Invoke a capability by name.
    pub async fn invoke(&self, name: &str, ctx: &mut C) -> FlowResult<StepOutcome> {
        let capability = self.get(name).ok_or_else(|| {
            FlowError::Configuration(format!("no capability registered for step '{}'", name))
        })?;
        capability.invoke(ctx).await
    }
}

impl<C: Send + 'static> Default for CapabilityRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for CapabilityRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}
