//! # Optimization
//!
//! Feedback loop from monitor output to the shared runtime tunables.

pub mod optimizer;
pub mod tunables;

pub use optimizer::{AppliedChange, Optimizer};
pub use tunables::Tunables;
