//! Aggregated and terminal orchestration results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::alert::Alert;
use super::compliance::ComplianceReport;
use super::optimization::OptimizationProposal;
use super::request::RequestPriority;
use super::stage_result::{ResourceUsage, StageResult};
use crate::stage::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Partial,
    Failure,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::Partial => "partial",
            OverallStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No completed stage produced a score
    Unknown,
    Low,
    Medium,
    High,
}

/// Derived risk estimate. The probability comes from a pluggable
/// [`RiskModel`](crate::orchestration::RiskModel); `model` names which one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub hallucination_probability: Option<f64>,
    pub level: RiskLevel,
    pub model: String,
}

/// Output of the aggregator: per-stage results merged into one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateOutcome {
    pub request_id: Uuid,
    pub status: OverallStatus,
    /// Mean quality of completed stages; `None` when nothing completed
    pub blended_score: Option<f64>,
    pub mean_accuracy: Option<f64>,
    pub risk: RiskEstimate,
    pub enabled: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub total_resource_usage: ResourceUsage,
    pub total_duration_ms: u64,
    /// A blocking-critical stage failed and the remaining waves were skipped
    pub aborted: bool,
    pub stage_results: Vec<StageResult>,
}

impl AggregateOutcome {
    /// Fraction of executed (non-skipped) stages that failed or timed out
    pub fn error_rate(&self) -> f64 {
        let executed = self.enabled - self.skipped;
        if executed == 0 {
            return 0.0;
        }
        (self.failed + self.timed_out) as f64 / executed as f64
    }

    pub fn stage(&self, stage: StageId) -> Option<&StageResult> {
        self.stage_results.iter().find(|result| result.stage == stage)
    }
}

/// Terminal, immutable result of one orchestration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub request_id: Uuid,
    pub priority: RequestPriority,
    pub status: OverallStatus,
    pub blended_score: Option<f64>,
    pub risk: RiskEstimate,
    pub stage_results: Vec<StageResult>,
    pub alerts: Vec<Alert>,
    /// Informational; applying them is a separate, serialized step
    pub proposals: Vec<OptimizationProposal>,
    pub compliance: ComplianceReport,
    /// Wall-clock duration per stage in milliseconds
    pub timings: BTreeMap<StageId, u64>,
    /// Outputs of completed stages keyed by stage name; withheld when blocked
    pub output: Option<serde_json::Value>,
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: u64,
}

impl OrchestrationResult {
    pub fn is_deliverable(&self) -> bool {
        !self.compliance.is_blocked()
    }
}
