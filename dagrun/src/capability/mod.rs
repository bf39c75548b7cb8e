//! Capability abstraction: the invocable units a plan dispatches to.
//!
//! The [`Capability`] trait decouples the scheduler from whatever a step
//! actually does (network calls, local compute). Tests use scripted
//! capabilities that return predetermined outputs without touching the
//! outside world.
//!
//! Capabilities are looked up once, at plan-parse time, through a
//! [`CapabilityRegistry`]; the scheduler never resolves names again.

pub mod context;
pub mod output;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::capability::context::InvocationContext;
use crate::capability::output::CapabilityOutput;
use crate::core::types::StepArgs;

/// One declared parameter of a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    /// Human description, surfaced in catalogs for the upstream planner.
    pub description: String,
    /// When true, a resolved reference replaces only the matched marker
    /// substring, preserving the surrounding text of the argument.
    pub partial: bool,
    /// When false, the resolver leaves this parameter untouched and the
    /// capability receives the raw reference text itself.
    pub resolve: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            partial: false,
            resolve: true,
        }
    }

    /// Mark this parameter for substring-only (partial) resolution.
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    /// Disable resolution: the capability wants the raw reference text.
    pub fn unresolved(mut self) -> Self {
        self.resolve = false;
        self
    }
}

/// An invocable unit of work with a declared argument schema.
pub trait Capability: Send + Sync {
    /// Stable name the planner refers to this capability by.
    fn name(&self) -> &str;

    /// Human description rendered into planner catalogs.
    fn description(&self) -> &str {
        ""
    }

    /// Declared parameters, in schema order.
    fn params(&self) -> &[ParamSpec];

    /// Names of output fields dependents may consume. Purely declarative;
    /// the authoritative set is whatever the invocation's
    /// [`output::OutputFields`] actually exposes.
    fn output_fields(&self) -> &[String] {
        &[]
    }

    /// Invoke with fully resolved arguments. Errors are expected and are
    /// converted to textual step results by the scheduler; they never
    /// abort the batch.
    fn invoke(&self, args: &StepArgs, ctx: &InvocationContext) -> Result<CapabilityOutput>;
}

impl dyn Capability {
    /// Declared parameter names, in schema order.
    pub fn param_names(&self) -> Vec<&str> {
        self.params().iter().map(|p| p.name.as_str()).collect()
    }

    /// Look up a declared parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params().iter().find(|p| p.name == name)
    }
}

/// Name-to-handler table, fixed before parsing starts.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    by_name: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Re-registering a name replaces the previous
    /// handler. Generic so call sites can hand over `Arc<Concrete>`
    /// without spelling the trait-object coercion themselves.
    pub fn register<C: Capability + 'static>(&mut self, capability: Arc<C>) {
        let capability: Arc<dyn Capability> = capability;
        self.by_name
            .insert(capability.name().to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.by_name.get(name).cloned()
    }

    /// Registered names, sorted for deterministic output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
