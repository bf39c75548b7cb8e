//! Per-invocation context passed to a capability.
//!
//! The resolved-dependency record is handed in explicitly rather than
//! through any ambient shared state: each invocation sees exactly the
//! bookkeeping produced while resolving its own arguments.

use indexmap::IndexMap;

/// Where a consumed argument's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Index of the producing step.
    pub producer: usize,
    /// Field of the producer's output (or input pass-through) that
    /// supplied the value.
    pub field: String,
}

/// Bookkeeping of which producing field supplied each consumed argument.
///
/// Capabilities use this to decide whether a value was a per-row series
/// from a producer (broadcast across expanded rows) or a single shared
/// scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDependencyRecord {
    entries: IndexMap<String, ResolvedDependency>,
}

impl ResolvedDependencyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, consumed_field: impl Into<String>, dependency: ResolvedDependency) {
        self.entries.insert(consumed_field.into(), dependency);
    }

    pub fn get(&self, consumed_field: &str) -> Option<&ResolvedDependency> {
        self.entries.get(consumed_field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolvedDependency)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context handed to [`crate::capability::Capability::invoke`].
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Index of the step being executed.
    pub step_index: usize,
    /// Which producing step and field supplied each resolved argument.
    pub resolved: ResolvedDependencyRecord,
}

impl InvocationContext {
    pub fn new(step_index: usize, resolved: ResolvedDependencyRecord) -> Self {
        Self {
            step_index,
            resolved,
        }
    }
}
