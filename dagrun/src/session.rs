//! Session-wide shared state: result table, step log, artifacts.
//!
//! These are the only structures mutated by multiple workers at once.
//! The result table is single-writer-per-key (each step index is written
//! exactly once); the step log is append-only. Nothing here blocks for
//! long: waiting on dependency order is the scheduler's job.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;

use crate::capability::output::{Artifact, CapabilityOutput};
use crate::core::types::{Step, StepArgs};

/// What a completed step left behind.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The capability ran and returned a structured result.
    Success(CapabilityOutput),
    /// Resolution or invocation failed; the error text is the result.
    Failure(String),
    /// Placeholder for the `join` sentinel, which is never dispatched.
    Join,
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failure(_))
    }

    /// Text this outcome contributes to the next planning round. Failures
    /// surface their error string; that is the fault-isolation contract.
    pub fn response_text(&self) -> String {
        match self {
            StepOutcome::Success(output) => output.response_text(),
            StepOutcome::Failure(error) => error.clone(),
            StepOutcome::Join => crate::core::types::JOIN.to_string(),
        }
    }
}

/// Result-table entry for one executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: Arc<Step>,
    /// Arguments as actually passed to the capability, post-resolution.
    pub resolved_args: StepArgs,
    pub outcome: StepOutcome,
}

/// Shared state that persists across planning rounds within one session.
///
/// A later round may reference step indices produced by an earlier round;
/// nothing is cleared between rounds.
#[derive(Default)]
pub struct Session {
    results: DashMap<usize, StepRecord>,
    log: RwLock<Vec<Arc<Step>>>,
    artifacts: RwLock<Vec<Artifact>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's result. Each index is written exactly once; a
    /// second write for the same index is dropped and logged, never
    /// overwritten.
    pub fn record(&self, index: usize, record: StepRecord) {
        match self.results.entry(index) {
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
            Entry::Occupied(_) => {
                warn!(index, "duplicate result for step index, keeping first");
            }
        }
    }

    pub fn has_result(&self, index: usize) -> bool {
        self.results.contains_key(&index)
    }

    pub fn result(&self, index: usize) -> Option<StepRecord> {
        self.results.get(&index).map(|entry| entry.value().clone())
    }

    /// All indices with a recorded result, ascending.
    pub fn result_indices(&self) -> BTreeSet<usize> {
        self.results.iter().map(|entry| *entry.key()).collect()
    }

    /// Append a step to the session log the moment the parser emits it.
    pub fn log_step(&self, step: Arc<Step>) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(step);
    }

    /// Snapshot of every step seen so far, in emission order.
    pub fn steps(&self) -> Vec<Arc<Step>> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a logged step by index.
    pub fn step(&self, index: usize) -> Option<Arc<Step>> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|step| step.index == index)
            .cloned()
    }

    /// Most recent logged non-`join` step other than `excluding`, if any.
    ///
    /// Resolver fallback for reference markers that carry no parseable
    /// index.
    pub fn latest_non_join_index(&self, excluding: usize) -> Option<usize> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|step| !step.is_join() && step.index != excluding)
            .map(|step| step.index)
    }

    /// Highest step index ever logged; the next planning round numbers
    /// from here.
    pub fn highest_index(&self) -> usize {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|step| step.index)
            .max()
            .unwrap_or(0)
    }

    /// Merge side artifacts, deduplicated by value equality.
    pub fn add_artifacts(&self, new: Vec<Artifact>) {
        if new.is_empty() {
            return;
        }
        let mut artifacts = self
            .artifacts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for artifact in new {
            if !artifacts.contains(&artifact) {
                artifacts.push(artifact);
            }
        }
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
