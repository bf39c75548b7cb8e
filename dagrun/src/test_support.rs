//! Test-only scripted capabilities.
//!
//! A [`ScriptedCapability`] returns predetermined outputs without touching
//! the outside world, and records every invocation so tests can assert on
//! resolved arguments and dependency bookkeeping.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::capability::context::InvocationContext;
use crate::capability::output::{Artifact, CapabilityOutput, OutputFields};
use crate::capability::{Capability, ParamSpec};
use crate::core::types::StepArgs;

/// A capability with fully scripted behavior.
pub struct ScriptedCapability {
    name: String,
    params: Vec<ParamSpec>,
    output_field_names: Vec<String>,
    value: Value,
    message: String,
    fields: Vec<(String, Value)>,
    artifacts: Vec<Artifact>,
    fail_with: Option<String>,
    panic_with: Option<String>,
    delay: Option<Duration>,
    echo_args: bool,
    seen: Mutex<Vec<(StepArgs, InvocationContext)>>,
}

impl ScriptedCapability {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            output_field_names: Vec::new(),
            value: Value::Null,
            message: String::new(),
            fields: Vec::new(),
            artifacts: Vec::new(),
            fail_with: None,
            panic_with: None,
            delay: None,
            echo_args: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Declare a parameter with default resolution flags.
    pub fn with_param(mut self, name: &str) -> Self {
        self.params.push(ParamSpec::new(name, ""));
        self
    }

    /// Declare a parameter with explicit flags.
    pub fn with_param_spec(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Fixed payload to return.
    pub fn returning(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    /// Expose a consumable output field in the result descriptor.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.output_field_names.push(name.to_string());
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Always fail with the given error message.
    pub fn failing(mut self, error: &str) -> Self {
        self.fail_with = Some(error.to_string());
        self
    }

    /// Panic on invocation (for fault-isolation tests).
    pub fn panicking(mut self, message: &str) -> Self {
        self.panic_with = Some(message.to_string());
        self
    }

    /// Sleep before returning, to hold a worker busy.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return the resolved arguments as the payload (a JSON object).
    pub fn echoing(mut self) -> Self {
        self.echo_args = true;
        self
    }

    /// Every invocation seen so far: resolved args plus context.
    pub fn invocations(&self) -> Vec<(StepArgs, InvocationContext)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    fn output_fields(&self) -> &[String] {
        &self.output_field_names
    }

    fn invoke(&self, args: &StepArgs, ctx: &InvocationContext) -> Result<CapabilityOutput> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((args.clone(), ctx.clone()));

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.panic_with {
            panic!("{message}");
        }
        if let Some(error) = &self.fail_with {
            return Err(anyhow!("{error}"));
        }

        let value = if self.echo_args {
            let object: Map<String, Value> =
                args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Value::Object(object)
        } else {
            self.value.clone()
        };

        let mut output = CapabilityOutput::new(value).with_message(&self.message);
        if !self.fields.is_empty() {
            let mut fields = OutputFields::new(&self.name);
            for (name, value) in &self.fields {
                fields.insert(name, value.clone(), "");
            }
            output = output.with_fields(fields);
        }
        for artifact in &self.artifacts {
            output = output.with_artifact(artifact.clone());
        }
        Ok(output)
    }
}
