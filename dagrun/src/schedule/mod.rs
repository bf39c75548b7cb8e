//! Dependency-aware concurrent execution of plan steps.
//!
//! Each round gets a fresh worker pool. Steps whose dependencies are
//! already satisfied are queued immediately; the rest each get a
//! lightweight supervisor thread that polls the result table and queues
//! the step once its inputs exist, or abandons it after a timeout.
//! Supervisors are dedicated threads rather than pool jobs so that a
//! round full of waiting steps cannot deadlock the pool.
//!
//! Failures stay inside the round: a capability error or panic becomes a
//! textual result for that step, visible to downstream consumers and to
//! the planner, and every other step keeps running.

pub mod graph;
pub mod pool;

use std::collections::{BTreeSet, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::capability::context::InvocationContext;
use crate::config::SchedulerConfig;
use crate::core::types::{Step, StepAction, StepArgs};
use crate::resolve::resolve_args;
use crate::session::{Session, StepOutcome, StepRecord};
use pool::WorkerPool;

/// One entry of a round's output: a step that finished this round, with
/// the arguments it actually ran with.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub index: usize,
    pub name: String,
    pub args: StepArgs,
    pub outcome: StepOutcome,
}

impl StepCompletion {
    /// `name(arg="value", ...)` over the resolved arguments, for
    /// transcripts. Round deduplication keys on [`Step::announcement`]
    /// (the declared arguments) instead, so two invocations that merely
    /// resolved to the same values are both reported.
    pub fn invocation_text(&self) -> String {
        format!("{}({})", self.name, render_args(&self.args))
    }
}

/// What a round produced: completions in ascending step order, with
/// duplicate invocations and `join` filtered out, plus the indices of
/// steps abandoned on timeout.
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub completions: Vec<StepCompletion>,
    pub abandoned: Vec<usize>,
}

impl RoundOutcome {
    /// Render the round for the planner: one block per completion, the
    /// invocation text followed by the step's textual result.
    pub fn transcript(&self) -> String {
        self.completions
            .iter()
            .map(|c| format!("{}\n{}", c.invocation_text(), c.outcome.response_text()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct Scheduler {
    session: Arc<Session>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(session: Arc<Session>, config: SchedulerConfig) -> Self {
        Self { session, config }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Execute one round of steps and block until every step has either
    /// recorded a result or been abandoned.
    ///
    /// The iterator may be lazy: each step is logged and dispatched the
    /// moment it arrives, so independent early steps run while a
    /// streaming planner is still emitting later lines.
    #[instrument(skip_all)]
    pub fn execute_round(&self, steps: impl IntoIterator<Item = Step>) -> RoundOutcome {
        let before = self.session.result_indices();

        let pool = Arc::new(WorkerPool::new(self.config.max_workers));
        let tracker = Arc::new(RoundTracker::new());
        let abandoned = Arc::new(Mutex::new(Vec::new()));
        let mut total = 0usize;

        for step in steps {
            let step = Arc::new(step);
            self.session.log_step(Arc::clone(&step));
            tracker.start_one();
            total += 1;
            let ready = step
                .dependencies
                .iter()
                .all(|dep| self.session.has_result(*dep));
            if ready {
                let session = Arc::clone(&self.session);
                let tracker = Arc::clone(&tracker);
                pool.execute(move || {
                    run_step(&session, &step);
                    tracker.finish_one();
                });
            } else {
                self.supervise(step, &pool, &tracker, &abandoned);
            }
        }
        debug!(steps = total, "round fully dispatched");

        tracker.wait_all_done();

        let abandoned = abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let completions = self.collect_completions(&before);
        debug!(
            completions = completions.len(),
            abandoned = abandoned.len(),
            "round finished"
        );
        RoundOutcome {
            completions,
            abandoned,
        }
    }

    /// Spawn a supervisor that polls until the step's dependencies are
    /// satisfied, then hands the step to the pool. The timeout check runs
    /// before the readiness check, so a stalled round terminates.
    fn supervise(
        &self,
        step: Arc<Step>,
        pool: &Arc<WorkerPool>,
        tracker: &Arc<RoundTracker>,
        abandoned: &Arc<Mutex<Vec<usize>>>,
    ) {
        let session = Arc::clone(&self.session);
        let pool = Arc::clone(pool);
        let watcher = Arc::clone(tracker);
        let abandoned = Arc::clone(abandoned);
        let poll = self.config.poll_interval();
        let timeout = self.config.wait_timeout();

        let spawned = thread::Builder::new()
            .name(format!("dagrun-wait-{}", step.index))
            .spawn(move || {
                let start = Instant::now();
                loop {
                    if start.elapsed() >= timeout {
                        let missing: Vec<usize> = step
                            .dependencies
                            .iter()
                            .copied()
                            .filter(|dep| !session.has_result(*dep))
                            .collect();
                        warn!(
                            index = step.index,
                            name = step.name(),
                            ?missing,
                            "abandoning step: dependencies never produced results"
                        );
                        abandoned
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(step.index);
                        watcher.finish_one();
                        return;
                    }
                    if step
                        .dependencies
                        .iter()
                        .all(|dep| session.has_result(*dep))
                    {
                        let session = Arc::clone(&session);
                        let tracker_job = Arc::clone(&watcher);
                        pool.execute(move || {
                            run_step(&session, &step);
                            tracker_job.finish_one();
                        });
                        return;
                    }
                    thread::sleep(poll);
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn step supervisor");
            tracker.finish_one();
        }
    }

    /// Results new to this round, ascending by index, `join` excluded,
    /// deduplicated by [`Step::announcement`] over the declared (raw)
    /// arguments.
    fn collect_completions(&self, before: &BTreeSet<usize>) -> Vec<StepCompletion> {
        let after = self.session.result_indices();
        let mut seen = HashSet::new();
        let mut completions = Vec::new();
        for index in after.difference(before) {
            let Some(record) = self.session.result(*index) else {
                continue;
            };
            if record.step.is_join() {
                continue;
            }
            if !seen.insert(record.step.announcement()) {
                continue;
            }
            completions.push(StepCompletion {
                index: *index,
                name: record.step.name().to_string(),
                args: record.resolved_args.clone(),
                outcome: record.outcome.clone(),
            });
        }
        completions
    }
}

/// Resolve, invoke, and record one step. Never returns an error: any
/// failure mode ends up as the step's recorded outcome.
fn run_step(session: &Session, step: &Arc<Step>) {
    let (resolved, dependencies) = resolve_args(step, session);
    let outcome = match &step.action {
        // `join` produces no value of its own; its record is the signal
        // that every prior step has been accounted for.
        StepAction::Join => StepOutcome::Join,
        StepAction::Invoke(capability) => {
            let ctx = InvocationContext::new(step.index, dependencies);
            match catch_unwind(AssertUnwindSafe(|| capability.invoke(&resolved, &ctx))) {
                Ok(Ok(output)) => {
                    session.add_artifacts(output.artifacts.clone());
                    StepOutcome::Success(output)
                }
                Ok(Err(error)) => StepOutcome::Failure(failure_text(step, &resolved, &error)),
                Err(panic) => {
                    StepOutcome::Failure(failure_text(step, &resolved, &panic_text(panic)))
                }
            }
        }
    };
    session.record(
        step.index,
        StepRecord {
            step: Arc::clone(step),
            resolved_args: resolved,
            outcome,
        },
    );
}

fn failure_text(step: &Step, resolved: &StepArgs, error: &dyn std::fmt::Display) -> String {
    format!(
        "ERROR(Failed to call {} with args {}. Args resolved to {}. Error: {})",
        step.name(),
        render_args(&step.args),
        render_args(resolved),
        error
    )
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "step panicked".to_string()
    }
}

fn render_args(args: &StepArgs) -> String {
    args.iter()
        .map(|(name, value)| match value {
            Value::String(text) => format!("{name}=\"{text}\""),
            other => format!("{name}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Counts outstanding steps for one round; the round is over when the
/// count drains to zero.
struct RoundTracker {
    remaining: Mutex<usize>,
    drained: Condvar,
}

impl RoundTracker {
    fn new() -> Self {
        Self {
            remaining: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Account for a newly dispatched step. Always called from the
    /// dispatching thread before `wait_all_done`, so the count cannot
    /// drain prematurely.
    fn start_one(&self) {
        let mut remaining = self
            .remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *remaining += 1;
    }

    fn finish_one(&self) {
        let mut remaining = self
            .remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_all_done(&self) {
        let mut remaining = self
            .remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *remaining > 0 {
            remaining = self
                .drained
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::JOIN;
    use crate::test_support::ScriptedCapability;
    use serde_json::json;
    use std::time::Duration;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            max_workers: 4,
            poll_interval_ms: 10,
            wait_timeout_secs: 1,
        }
    }

    fn invoke_step(index: usize, capability: Arc<ScriptedCapability>, args: &[(&str, Value)], raw: &str) -> Step {
        let mut step_args = StepArgs::new();
        for (name, value) in args {
            step_args.insert((*name).to_string(), value.clone());
        }
        Step {
            index,
            dependencies: crate::core::deps::dependencies(index, false, raw),
            action: StepAction::Invoke(capability),
            args: step_args,
            thought: None,
        }
    }

    fn join_step(index: usize) -> Step {
        Step {
            index,
            dependencies: crate::core::deps::dependencies(index, true, ""),
            action: StepAction::Join,
            args: StepArgs::new(),
            thought: None,
        }
    }

    #[test]
    fn ready_steps_run_and_land_in_ascending_order() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let cap = Arc::new(ScriptedCapability::new("emit").with_param("tag").echoing());

        let round = scheduler.execute_round([
            invoke_step(2, Arc::clone(&cap), &[("tag", json!("b"))], "tag=b"),
            invoke_step(1, Arc::clone(&cap), &[("tag", json!("a"))], "tag=a"),
        ]);
        let indices: Vec<usize> = round.completions.iter().map(|c| c.index).collect();
        assert_eq!(indices, [1, 2]);
        assert!(round.abandoned.is_empty());
        assert_eq!(cap.invocation_count(), 2);
    }

    #[test]
    fn dependent_step_waits_for_its_producer() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let slow = Arc::new(
            ScriptedCapability::new("slow")
                .with_delay(Duration::from_millis(50))
                .with_field("out", json!(7)),
        );
        let consumer = Arc::new(ScriptedCapability::new("consume").with_param("value").echoing());

        let round = scheduler.execute_round([
            invoke_step(1, slow, &[], ""),
            invoke_step(
                2,
                Arc::clone(&consumer),
                &[("value", json!("${1}.out"))],
                "value=${1}.out",
            ),
        ]);
        assert_eq!(round.completions.len(), 2);
        let consumed = &consumer.invocations()[0].0;
        assert_eq!(consumed["value"], json!(7));
    }

    #[test]
    fn failing_step_records_error_text_and_round_survives() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let bad = Arc::new(ScriptedCapability::new("bad").with_param("x").failing("boom"));
        let good = Arc::new(ScriptedCapability::new("good").echoing());

        let round = scheduler.execute_round([
            invoke_step(1, bad, &[("x", json!(1))], "x=1"),
            invoke_step(2, good, &[], ""),
        ]);
        assert_eq!(round.completions.len(), 2);
        let failed = &round.completions[0];
        assert!(failed.outcome.is_failure());
        let text = failed.outcome.response_text();
        assert!(text.starts_with("ERROR(Failed to call bad with args x=1."));
        assert!(text.contains("Error: boom"));
    }

    #[test]
    fn panicking_step_is_isolated_as_failure() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let volatile = Arc::new(ScriptedCapability::new("volatile").panicking("kaboom"));
        let steady = Arc::new(ScriptedCapability::new("steady").echoing());

        let round = scheduler.execute_round([
            invoke_step(1, volatile, &[], ""),
            invoke_step(2, steady, &[], ""),
        ]);
        assert_eq!(round.completions.len(), 2);
        assert!(round.completions[0].outcome.is_failure());
        assert!(round.completions[0].outcome.response_text().contains("kaboom"));
    }

    #[test]
    fn join_waits_for_everything_and_is_not_reported() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let cap = Arc::new(ScriptedCapability::new("emit").with_param("tag").echoing());

        let round = scheduler.execute_round([
            invoke_step(1, Arc::clone(&cap), &[("tag", json!("a"))], "tag=a"),
            invoke_step(2, cap, &[("tag", json!("b"))], "tag=b"),
            join_step(3),
        ]);
        assert_eq!(round.completions.len(), 2);
        assert!(round.completions.iter().all(|c| c.name != JOIN));
        // The join result exists in the session even though it is not part
        // of the round output.
        assert!(session.has_result(3));
    }

    #[test]
    fn unsatisfiable_dependency_is_abandoned_without_a_result() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let cap = Arc::new(ScriptedCapability::new("emit").with_param("v").echoing());

        // Step 2 references step 1, which is never scheduled.
        let round = scheduler.execute_round([invoke_step(
            2,
            cap,
            &[("v", json!("$1"))],
            "v=$1",
        )]);
        assert!(round.completions.is_empty());
        assert_eq!(round.abandoned, [2]);
        assert!(!session.has_result(2));
    }

    #[test]
    fn duplicate_invocations_collapse_in_round_output() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let cap = Arc::new(ScriptedCapability::new("emit").with_param("tag").echoing());

        let round = scheduler.execute_round([
            invoke_step(1, Arc::clone(&cap), &[("tag", json!("same"))], "tag=same"),
            invoke_step(2, Arc::clone(&cap), &[("tag", json!("same"))], "tag=same"),
        ]);
        assert_eq!(round.completions.len(), 1);
        assert_eq!(round.completions[0].index, 1);
        // Both steps still ran and recorded results.
        assert!(session.has_result(1));
        assert!(session.has_result(2));
    }

    #[test]
    fn early_steps_run_while_the_plan_is_still_arriving() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let slow = Arc::new(
            ScriptedCapability::new("slow").with_delay(Duration::from_millis(200)),
        );
        let fast = Arc::new(ScriptedCapability::new("fast").echoing());

        // A lazy iterator standing in for a streaming planner: the first
        // step is available immediately, the second only 200ms later.
        let mut first = Some(invoke_step(1, slow, &[], ""));
        let mut second = Some(invoke_step(2, fast, &[], ""));
        let steps = std::iter::from_fn(move || {
            if let Some(step) = first.take() {
                return Some(step);
            }
            if let Some(step) = second.take() {
                thread::sleep(Duration::from_millis(200));
                return Some(step);
            }
            None
        });

        let start = Instant::now();
        let round = scheduler.execute_round(steps);
        let elapsed = start.elapsed();

        assert_eq!(round.completions.len(), 2);
        // The slow step overlaps the planner gap. Waiting for the full
        // plan before dispatching would serialize them to 400ms+.
        assert!(
            elapsed < Duration::from_millis(350),
            "round took {elapsed:?}"
        );
    }

    #[test]
    fn dedup_keys_on_declared_arguments_not_resolved_values() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let quote = Arc::new(
            ScriptedCapability::new("quote")
                .with_param("code")
                .with_field("v", json!("10")),
        );
        let consume = Arc::new(ScriptedCapability::new("consume").with_param("v").echoing());

        let round = scheduler.execute_round([
            invoke_step(1, quote, &[("code", json!("A"))], "code=\"A\""),
            invoke_step(2, Arc::clone(&consume), &[("v", json!("$1"))], "v=$1"),
            invoke_step(3, consume, &[("v", json!("10"))], "v=10"),
        ]);

        // Steps 2 and 3 resolve to identical argument values, but their
        // declared arguments differ, so both stay in the round output.
        assert_eq!(round.completions.len(), 3);
        assert_eq!(round.completions[1].args["v"], json!("10"));
        assert_eq!(round.completions[2].args["v"], json!("10"));
        assert_eq!(round.completions[1].invocation_text(), "consume(v=\"10\")");
    }

    #[test]
    fn transcript_pairs_announcements_with_results() {
        let session = Arc::new(Session::new());
        let scheduler = Scheduler::new(Arc::clone(&session), fast_config());
        let cap = Arc::new(
            ScriptedCapability::new("quote")
                .with_param("code")
                .returning(json!("188.1")),
        );

        let round = scheduler.execute_round([invoke_step(
            1,
            cap,
            &[("code", json!("AAPL"))],
            "code=\"AAPL\"",
        )]);
        let transcript = round.transcript();
        assert!(transcript.contains("quote(code=\"AAPL\")"));
        assert!(transcript.contains("188.1"));
    }
}
