//! Incremental parsing of plan text into executable steps.
//!
//! Plans arrive as a stream of text fragments with no alignment to line
//! boundaries. The parser buffers fragments, emits a [`Step`] for every
//! completed action line, and only ever consumes whole lines, so a step
//! is emitted exactly once no matter how the stream is chunked.
//!
//! Parsing is lossy by design: a malformed line or an action naming an
//! unregistered capability is logged and dropped rather than failing the
//! plan. The planner upstream is a language model; garbage lines are an
//! expected input class, not an error path.

use std::sync::LazyLock;

use tracing::{debug, error};

use crate::capability::CapabilityRegistry;
use crate::core::deps::dependencies;
use crate::core::split::split_args;
use crate::core::types::{JOIN, Step, StepAction, StepArgs};

/// Matches a numbered action line: `2. lookup(code="AAPL")`, with an
/// optional trailing `#tag` disambiguator.
static ACTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\s*(\d+)\.\s*(\w+)\((.*)\)\s*(?:#\w+)?\s*$")
        .expect("valid action pattern")
});

/// Matches an interstitial reasoning line the planner may emit before an
/// action. The text is attached to the next step.
static THOUGHT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"Thought:\s*([^\n]*)").expect("valid thought pattern")
});

/// Incremental plan parser bound to a capability registry.
///
/// One parser instance covers one planning round. For follow-up rounds,
/// construct with [`PlanParser::with_offset`] so step indices continue
/// the session-global numbering instead of restarting at 1.
pub struct PlanParser {
    registry: CapabilityRegistry,
    offset: usize,
    buffer: String,
    thought: Option<String>,
}

impl PlanParser {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_offset(registry, 0)
    }

    /// A parser whose emitted steps are numbered `offset + local index`.
    pub fn with_offset(registry: CapabilityRegistry, offset: usize) -> Self {
        Self {
            registry,
            offset,
            buffer: String::new(),
            thought: None,
        }
    }

    /// Feed one fragment of plan text, returning the steps completed by
    /// it. Fragments may split lines anywhere, including mid-token.
    pub fn ingest(&mut self, fragment: &str) -> Vec<Step> {
        self.buffer.push_str(fragment);
        let mut steps = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(step) = self.parse_line(line.trim_end_matches('\n')) {
                steps.push(step);
            }
        }
        steps
    }

    /// Flush the trailing unterminated line, if any. Call once the stream
    /// has ended.
    pub fn finish(&mut self) -> Vec<Step> {
        let rest = std::mem::take(&mut self.buffer);
        let mut steps = Vec::new();
        if let Some(step) = self.parse_line(&rest) {
            steps.push(step);
        }
        steps
    }

    /// Parse a complete plan text in one call. Equivalent to streaming the
    /// whole text through [`ingest`](Self::ingest) plus
    /// [`finish`](Self::finish).
    pub fn parse_complete(&mut self, text: &str) -> Vec<Step> {
        let mut steps = self.ingest(text);
        steps.extend(self.finish());
        steps
    }

    fn parse_line(&mut self, line: &str) -> Option<Step> {
        if line.trim().is_empty() {
            return None;
        }
        if let Some(caps) = THOUGHT_RE.captures(line) {
            self.thought = Some(caps[1].trim().to_string());
            return None;
        }
        let Some(caps) = ACTION_RE.captures(line) else {
            debug!(line, "skipping non-action line");
            return None;
        };

        let local: usize = caps[1].parse().ok()?;
        let index = self.offset + local;
        let name = &caps[2];
        let raw_args = &caps[3];

        let (action, args) = if name == JOIN {
            (StepAction::Join, StepArgs::new())
        } else {
            let Some(capability) = self.registry.get(name) else {
                error!(name, index, "plan names an unregistered capability");
                return None;
            };
            let names = capability.param_names();
            let args = split_args(raw_args, &names);
            (StepAction::Invoke(capability), args)
        };

        Some(Step {
            index,
            dependencies: dependencies(index, matches!(action, StepAction::Join), raw_args),
            action,
            args,
            thought: self.thought.take(),
        })
    }
}
