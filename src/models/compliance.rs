//! Compliance constraints and verdicts.

use serde::{Deserialize, Serialize};

use crate::stage::StageId;

/// A check the compliance gate can evaluate against an aggregated outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum ComplianceControl {
    /// The stage must have completed
    StageCompleted { stage: StageId },
    /// The stage's output must carry `key: true` (e.g. `pii_redacted`)
    OutputFlag { stage: StageId, key: String },
    /// Blended score must be at least this value
    MinimumQuality { value: f64 },
    /// Estimated hallucination probability must not exceed this value
    MaximumRisk { value: f64 },
    /// Summed stage cost units must not exceed this value
    MaximumCost { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRequirement {
    pub id: String,
    /// Unmet mandatory requirements block the result; others only flag it
    pub mandatory: bool,
    pub control: ComplianceControl,
}

impl ComplianceRequirement {
    pub fn mandatory(id: impl Into<String>, control: ComplianceControl) -> Self {
        Self {
            id: id.into(),
            mandatory: true,
            control,
        }
    }

    pub fn advisory(id: impl Into<String>, control: ComplianceControl) -> Self {
        Self {
            id: id.into(),
            mandatory: false,
            control,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceVerdict {
    Pass,
    Flagged,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub requirement: String,
    pub mandatory: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub verdict: ComplianceVerdict,
    pub violations: Vec<ComplianceViolation>,
}

impl ComplianceReport {
    pub fn pass() -> Self {
        Self {
            verdict: ComplianceVerdict::Pass,
            violations: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.verdict == ComplianceVerdict::Blocked
    }
}
