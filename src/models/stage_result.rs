//! Per-stage execution result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

use crate::stage::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Timeout,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Running)
    }

    /// Failed or timed out: counts against health and the circuit breaker
    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed | StageStatus::Timeout)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource usage estimate reported by a stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_ms: u64,
    pub memory_kb: u64,
    /// Abstract cost units (tokens, API calls, ...)
    pub cost_units: f64,
}

impl AddAssign for ResourceUsage {
    fn add_assign(&mut self, other: Self) {
        self.cpu_ms += other.cpu_ms;
        self.memory_kb += other.memory_kb;
        self.cost_units += other.cost_units;
    }
}

/// Outcome of one stage within one request.
///
/// Owned by the coordinator while the request runs and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageId,
    pub stage_name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Invocations of the stage function (0 when skipped or short-circuited)
    pub attempts: u32,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    /// Quality score in [0, 1]
    pub quality: f64,
    /// Accuracy score in [0, 1]
    pub accuracy: f64,
    pub errors: Vec<String>,
    pub skip_reason: Option<String>,
    pub resource_usage: ResourceUsage,
    /// Output served from the stage cache
    pub cached: bool,
}

impl StageResult {
    pub fn pending(stage: StageId, stage_name: impl Into<String>) -> Self {
        Self {
            stage,
            stage_name: stage_name.into(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            attempts: 0,
            input: serde_json::Value::Null,
            output: None,
            quality: 0.0,
            accuracy: 0.0,
            errors: Vec::new(),
            skip_reason: None,
            resource_usage: ResourceUsage::default(),
            cached: false,
        }
    }

    pub fn skipped(stage: StageId, stage_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: StageStatus::Skipped,
            started_at: Some(now),
            completed_at: Some(now),
            skip_reason: Some(reason.into()),
            ..Self::pending(stage, stage_name)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}
