//! Structured results produced by capability invocations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::value_to_text;

/// One consumable output field: a value plus a human description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    pub value: Value,
    #[serde(default)]
    pub description: String,
}

/// The field-keyed view of a completed step's result that dependents may
/// consume. Not every result exposes one; plain results stay opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFields {
    /// Name of the capability that produced these fields.
    pub capability: String,
    fields: IndexMap<String, OutputField>,
}

impl OutputFields {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: Value,
        description: impl Into<String>,
    ) {
        self.fields.insert(
            name.into(),
            OutputField {
                value,
                description: description.into(),
            },
        );
    }

    /// Builder form of [`Self::insert`].
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value, "");
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|field| &field.value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A side artifact a capability produced while running (a table, a chart
/// payload). Collected per session and deduplicated by value equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub title: String,
    pub data: Value,
}

/// Successful result of a capability invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityOutput {
    /// The opaque result payload.
    pub value: Value,
    /// Extra message for the conversation loop (hints for replanning).
    pub message: String,
    /// When false, only `message` flows back to the planner; the payload
    /// is withheld from the response text.
    pub include_in_response: bool,
    /// Field-keyed view for dependents, if this capability declares one.
    pub fields: Option<OutputFields>,
    /// Side artifacts to merge into the session collection.
    pub artifacts: Vec<Artifact>,
}

impl CapabilityOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            message: String::new(),
            include_in_response: true,
            fields: None,
            artifacts: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_fields(mut self, fields: OutputFields) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn withheld(mut self) -> Self {
        self.include_in_response = false;
        self
    }

    /// Text this result contributes to the next planning round.
    pub fn response_text(&self) -> String {
        if !self.include_in_response {
            return self.message.clone();
        }
        let payload = value_to_text(&self.value);
        if self.message.is_empty() {
            payload
        } else if payload.is_empty() {
            self.message.clone()
        } else {
            format!("{}\n{}", self.message, payload)
        }
    }
}
