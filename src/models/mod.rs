//! # Data Model
//!
//! Request, result, health, alert and optimization types shared by every
//! component of the orchestration core. All types serialize with serde so
//! persistence and transport adapters can store them as documents.

pub mod alert;
pub mod compliance;
pub mod dependency;
pub mod health;
pub mod metric;
pub mod optimization;
pub mod request;
pub mod result;
pub mod stage_result;

pub use alert::{Alert, AlertSeverity, AlertState, AlertType, NotificationPriority};
pub use compliance::{
    ComplianceControl, ComplianceReport, ComplianceRequirement, ComplianceVerdict,
    ComplianceViolation,
};
pub use dependency::{Dependency, DependencyStrength};
pub use health::{ComponentHealth, ComponentKind, HealthSnapshot, HealthStatus};
pub use metric::MetricKind;
pub use optimization::{OptimizationProposal, ProposalState, TunableChange, ValidationOutcome};
pub use request::{
    OrchestrationRequest, RequestConstraints, RequestContext, RequestPriority, ResourceLimits,
};
pub use result::{AggregateOutcome, OrchestrationResult, OverallStatus, RiskEstimate, RiskLevel};
pub use stage_result::{ResourceUsage, StageResult, StageStatus};
