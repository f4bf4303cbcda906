//! # Orchestration Engine
//!
//! Request-scoped pipeline execution.
//!
//! ## Core Components
//!
//! - **planner**: topological wave layering over the declared dependency edges
//! - **Coordinator**: executes waves with per-stage timeout, retry and
//!   circuit-breaker policy under a global concurrency cap
//! - **Aggregator**: merges stage results into status, blended score and risk
//! - **ComplianceGate**: late-pipeline pass/flag/block verdict
//! - **Orchestrator**: caller-facing facade wiring the above to health,
//!   monitoring, optimization and persistence

pub mod aggregator;
pub mod compliance;
pub mod coordinator;
pub mod orchestrator;
pub mod planner;

pub use aggregator::{Aggregator, InverseQualityRisk, RiskModel};
pub use compliance::ComplianceGate;
pub use coordinator::{Coordinator, StageRun};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use planner::{plan, ExecutionPlan};
