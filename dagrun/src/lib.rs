//! Streaming, dependency-aware execution of planned tool calls.
//!
//! A planner (typically a language model) emits a numbered plan as text.
//! This crate parses that text incrementally into steps
//! ([`plan::PlanParser`]), wires the steps together through `$n`
//! reference markers ([`resolve`]), and executes them concurrently as
//! soon as their inputs exist ([`schedule::Scheduler`]). Results
//! accumulate in a [`session::Session`] that survives across planning
//! rounds.
//!
//! # Module Map
//!
//! - [`core`]: pure text-level machinery (step types, literal parsing,
//!   argument splitting, marker scanning, edit distance)
//! - [`capability`]: the handler trait, registry, and structured outputs
//! - [`plan`]: incremental plan-text parsing
//! - [`resolve`]: layered reference resolution against prior results
//! - [`schedule`]: worker pool, per-step supervision, round execution
//! - [`session`]: cross-round result table, step log, and artifacts
//! - [`config`]: TOML scheduler configuration
//! - [`logging`]: `RUST_LOG` tracing setup

pub mod capability;
pub mod config;
pub mod core;
pub mod logging;
pub mod plan;
pub mod resolve;
pub mod schedule;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use capability::{Capability, CapabilityRegistry, ParamSpec};
pub use capability::output::CapabilityOutput;
pub use config::SchedulerConfig;
pub use core::types::Step;
pub use plan::PlanParser;
pub use schedule::{RoundOutcome, Scheduler, StepCompletion};
pub use session::{Session, StepOutcome};
