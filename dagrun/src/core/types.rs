//! Shared types for planned steps.
//!
//! A [`Step`] is immutable once the parser emits it: the scheduler and
//! resolver only ever read it. Contracts here must stay deterministic so
//! that a given plan text always produces the same step records.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::capability::Capability;

/// Name of the terminal sentinel action that closes a planning round.
pub const JOIN: &str = "join";

/// Ordered mapping of parameter name to parsed argument value.
///
/// Insertion order follows first occurrence in the plan text, which keeps
/// rendered announcements stable across runs.
pub type StepArgs = IndexMap<String, Value>;

/// What a step does when dispatched.
///
/// `join` is a distinct variant rather than a capability so the scheduler
/// can never accidentally invoke it.
#[derive(Clone)]
pub enum StepAction {
    /// Invoke a registered capability.
    Invoke(Arc<dyn Capability>),
    /// Terminal sentinel: collect everything produced so far.
    Join,
}

impl StepAction {
    pub fn name(&self) -> &str {
        match self {
            StepAction::Invoke(capability) => capability.name(),
            StepAction::Join => JOIN,
        }
    }
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Invoke(capability) => {
                f.debug_tuple("Invoke").field(&capability.name()).finish()
            }
            StepAction::Join => f.write_str("Join"),
        }
    }
}

/// One unit of planned work.
#[derive(Debug, Clone)]
pub struct Step {
    /// Positive index, unique within a session, strictly increasing in
    /// emission order.
    pub index: usize,
    /// Capability to invoke, or the `join` sentinel.
    pub action: StepAction,
    /// Parsed arguments in plan-text order. Values may still contain
    /// unresolved reference markers (`$2`, `${2}.field`).
    pub args: StepArgs,
    /// Indices of earlier steps this step's arguments reference. For a
    /// `join` step this is every prior index regardless of argument text.
    pub dependencies: BTreeSet<usize>,
    /// Free-text annotation from a preceding `Thought:` line. Not
    /// semantically load-bearing.
    pub thought: Option<String>,
}

impl Step {
    pub fn name(&self) -> &str {
        self.action.name()
    }

    pub fn is_join(&self) -> bool {
        matches!(self.action, StepAction::Join)
    }

    /// Render the step as `name(key="value", ...)`.
    ///
    /// This is the announcement text the scheduler deduplicates round
    /// output by, so it must be a pure function of the declared arguments.
    pub fn announcement(&self) -> String {
        let rendered: Vec<String> = self
            .args
            .iter()
            .map(|(key, value)| format!("{key}=\"{}\"", value_to_text(value)))
            .collect();
        format!("{}({})", self.name(), rendered.join(", "))
    }
}

/// Render a JSON value the way it reads in plan text: strings bare,
/// everything else as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
