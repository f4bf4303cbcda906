//! # Health
//!
//! Component and aggregate health for the pipeline. [`HealthChecker`] probes
//! stages (liveness combined with circuit breaker state) and infrastructure
//! dependencies registered as [`HealthProbe`]s.

pub mod checker;
pub mod probe;

pub use checker::HealthChecker;
pub use probe::HealthProbe;
