//! # Stages
//!
//! A stage is one pluggable unit of the pipeline. The coordinator only
//! depends on the [`Stage`] contract; new stages are added by registering
//! them in a [`StageRegistry`], never by editing the coordinator.
//!
//! ## Usage
//!
//! ```rust
//! use veracity_core::stage::{builtin, StageRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = StageRegistry::new();
//! builtin::register_defaults(&mut registry)?;
//! assert_eq!(registry.len(), 4);
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod fn_stage;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use crate::error::StageError;
use crate::models::{Dependency, HealthStatus, RequestContext, ResourceUsage};

pub use fn_stage::FnStage;
pub use registry::StageRegistry;

/// Numeric stage identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u16);

impl StageId {
    pub const INPUT_VALIDATION: StageId = StageId(1);
    pub const CONTEXT_ASSEMBLY: StageId = StageId(2);
    pub const RESPONSE_VALIDATION: StageId = StageId(3);
    pub const FEEDBACK_LEARNING: StageId = StageId(4);
    pub const INTEGRATION: StageId = StageId(5);
    pub const OPTIMIZATION: StageId = StageId(6);
    pub const COMPLIANCE: StageId = StageId(7);
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-invocation context handed to [`Stage::run`]
#[derive(Debug, Clone)]
pub struct StageContext {
    pub request_id: Uuid,
    pub stage: StageId,
    /// 1-based attempt number
    pub attempt: u32,
    /// The stage's slice of the request budget ends here
    pub deadline: Instant,
    /// Current validation strictness tunable in [0, 1]
    pub validation_strictness: f64,
}

/// Input handed to a stage: the request payload plus upstream outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    pub payload: serde_json::Value,
    pub context: RequestContext,
    /// Outputs of completed upstream stages, keyed by stage id
    pub upstream: BTreeMap<StageId, serde_json::Value>,
}

impl StageInput {
    pub fn upstream(&self, stage: StageId) -> Option<&serde_json::Value> {
        self.upstream.get(&stage)
    }

    /// Serialized form recorded on the stage result
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Quality and resource report accompanying a stage output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub quality: f64,
    pub accuracy: f64,
    pub resource_usage: ResourceUsage,
}

impl QualityReport {
    /// Build a report, clamping both scores into [0, 1]. Non-finite scores become 0.
    pub fn new(quality: f64, accuracy: f64) -> Self {
        Self {
            quality: clamp_unit(quality),
            accuracy: clamp_unit(accuracy),
            resource_usage: ResourceUsage::default(),
        }
    }

    pub fn with_resource_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usage = usage;
        self
    }

    /// The same report with both scores forced into [0, 1]. Reports built
    /// as struct literals skip `new`, so the coordinator applies this to
    /// every stage output.
    pub fn clamped(self) -> Self {
        let mut resource_usage = self.resource_usage;
        if !resource_usage.cost_units.is_finite() || resource_usage.cost_units < 0.0 {
            resource_usage.cost_units = 0.0;
        }
        Self {
            quality: clamp_unit(self.quality),
            accuracy: clamp_unit(self.accuracy),
            resource_usage,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub output: serde_json::Value,
    pub report: QualityReport,
}

impl StageOutput {
    pub fn new(output: serde_json::Value, report: QualityReport) -> Self {
        Self { output, report }
    }
}

/// Result of a stage liveness check
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessReport {
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl LivenessReport {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }
}

/// One pluggable pipeline stage
#[async_trait]
pub trait Stage: Send + Sync + fmt::Debug {
    fn id(&self) -> StageId;

    fn name(&self) -> &str;

    /// Edges from this stage to the stages it depends on
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Whether outputs may be served from the stage cache for identical input
    fn cacheable(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &StageContext, input: &StageInput) -> Result<StageOutput, StageError>;

    /// Lightweight liveness check used by the health checker
    async fn health_check(&self) -> Result<LivenessReport, StageError> {
        Ok(LivenessReport::healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_report_clamps_scores() {
        let report = QualityReport::new(1.7, f64::NAN);
        assert_eq!(report.quality, 1.0);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(QualityReport::new(-0.2, 0.4).quality, 0.0);
    }

    #[test]
    fn test_literal_report_is_clamped() {
        let report = QualityReport {
            quality: f64::NAN,
            accuracy: 1.7,
            resource_usage: ResourceUsage {
                cost_units: f64::INFINITY,
                ..ResourceUsage::default()
            },
        }
        .clamped();
        assert_eq!(report.quality, 0.0);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.resource_usage.cost_units, 0.0);
    }

    #[test]
    fn test_stage_id_display_and_order() {
        assert_eq!(StageId::RESPONSE_VALIDATION.to_string(), "3");
        assert!(StageId::INPUT_VALIDATION < StageId::COMPLIANCE);
    }
}
