//! Optimization proposals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::metric::MetricKind;

/// Lifecycle `planned -> applied -> validated -> (kept | reverted)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Planned,
    Applied,
    Validated,
    Kept,
    Reverted,
}

/// A single bounded change to the shared runtime tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tunable", content = "value", rename_all = "snake_case")]
pub enum TunableChange {
    CachingEnabled(bool),
    ValidationStrictness(f64),
    RetryAttempts(u32),
    WaveConcurrency(usize),
}

impl fmt::Display for TunableChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunableChange::CachingEnabled(value) => write!(f, "caching_enabled={value}"),
            TunableChange::ValidationStrictness(value) => {
                write!(f, "validation_strictness={value:.2}")
            }
            TunableChange::RetryAttempts(value) => write!(f, "retry_attempts={value}"),
            TunableChange::WaveConcurrency(value) => write!(f, "wave_concurrency={value}"),
        }
    }
}

/// Measured effect of an applied change after the observation window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub before: f64,
    pub after: f64,
    /// Relative regression of the target metric (0 when it improved)
    pub regression: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProposal {
    pub id: Uuid,
    pub target_metric: MetricKind,
    pub current_value: f64,
    pub target_value: f64,
    pub threshold_value: f64,
    pub changes: Vec<TunableChange>,
    /// Estimated relative improvement of the target metric
    pub estimated_benefit: f64,
    /// Estimated relative resource cost
    pub estimated_cost: f64,
    pub rationale: String,
    pub state: ProposalState,
    pub validation: Option<ValidationOutcome>,
    pub created_at: DateTime<Utc>,
}

impl OptimizationProposal {
    pub fn new(
        target_metric: MetricKind,
        current_value: f64,
        target_value: f64,
        threshold_value: f64,
        change: TunableChange,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_metric,
            current_value,
            target_value,
            threshold_value,
            changes: vec![change],
            estimated_benefit: 0.0,
            estimated_cost: 0.0,
            rationale: String::new(),
            state: ProposalState::Planned,
            validation: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_estimates(mut self, benefit: f64, cost: f64) -> Self {
        self.estimated_benefit = benefit;
        self.estimated_cost = cost;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}
