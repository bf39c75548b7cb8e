//! Pure deterministic logic for plan parsing and reference resolution.
//!
//! Everything in this module is side-effect free: text in, values out. No
//! shared state, no threads, no clocks. The concurrent machinery lives in
//! [`crate::schedule`] and only calls into here.

pub mod deps;
pub mod distance;
pub mod literal;
pub mod split;
pub mod types;
