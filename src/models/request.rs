//! Orchestration request model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use super::compliance::ComplianceRequirement;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::stage::StageId;

/// Request priority. Recorded in history and logs; scheduling is FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Snapshot of the system, environment and user at submission time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub system: serde_json::Value,
    pub environment: serde_json::Value,
    pub user: serde_json::Value,
}

/// Resource limits a single request must respect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Lowers the per-wave concurrency for this request only
    pub max_concurrent_stages: Option<usize>,
    /// Soft cap on the summed stage cost units, checked by the compliance gate
    pub max_total_cost: Option<f64>,
}

/// Constraints attached to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestConstraints {
    /// Blended scores below this floor are flagged (never blocked)
    pub quality_floor: Option<f64>,
    pub compliance: Vec<ComplianceRequirement>,
    pub resource_limits: ResourceLimits,
    /// Stages whose failure aborts the remaining waves
    pub blocking_stages: BTreeSet<StageId>,
}

/// One external orchestration call. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub id: Uuid,
    pub enabled_stages: BTreeSet<StageId>,
    pub priority: RequestPriority,
    pub timeout_ms: u64,
    /// Opaque payload handed to every stage (message, draft response, ...)
    pub payload: serde_json::Value,
    pub context: RequestContext,
    pub constraints: RequestConstraints,
    pub submitted_at: DateTime<Utc>,
}

impl OrchestrationRequest {
    pub fn new(enabled_stages: impl IntoIterator<Item = StageId>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled_stages: enabled_stages.into_iter().collect(),
            priority: RequestPriority::default(),
            timeout_ms: timeout.as_millis() as u64,
            payload: serde_json::Value::Null,
            context: RequestContext::default(),
            constraints: RequestConstraints::default(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_constraints(mut self, constraints: RequestConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject requests that cannot be executed at all
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.timeout_ms == 0 {
            return Err(OrchestratorError::Configuration(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(floor) = self.constraints.quality_floor {
            if !(0.0..=1.0).contains(&floor) {
                return Err(OrchestratorError::Configuration(format!(
                    "quality floor must be in [0, 1], got {floor}"
                )));
            }
        }
        if self.constraints.resource_limits.max_concurrent_stages == Some(0) {
            return Err(OrchestratorError::Configuration(
                "max_concurrent_stages limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
