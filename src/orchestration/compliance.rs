//! # Compliance Gate
//!
//! Late-pipeline evaluation of the request's declared compliance
//! requirements. Unmet mandatory requirements block the result; unmet
//! advisory requirements, the request quality floor and the request cost
//! limit only flag it.

use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::models::{
    AggregateOutcome, ComplianceControl, ComplianceReport, ComplianceRequirement,
    ComplianceVerdict, ComplianceViolation, RequestConstraints,
};

const QUALITY_FLOOR_REQUIREMENT: &str = "request.quality_floor";
const COST_LIMIT_REQUIREMENT: &str = "request.max_total_cost";

#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceGate;

impl ComplianceGate {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, outcome: &AggregateOutcome, constraints: &RequestConstraints) -> ComplianceReport {
        let mut violations: Vec<ComplianceViolation> = constraints
            .compliance
            .iter()
            .filter_map(|requirement| evaluate(requirement, outcome))
            .collect();

        if let Some(floor) = constraints.quality_floor {
            match outcome.blended_score {
                Some(score) if score >= floor => {}
                score => violations.push(ComplianceViolation {
                    requirement: QUALITY_FLOOR_REQUIREMENT.to_string(),
                    mandatory: false,
                    detail: format!("blended score {} below floor {floor:.2}", describe(score)),
                }),
            }
        }
        if let Some(limit) = constraints.resource_limits.max_total_cost {
            let cost = outcome.total_resource_usage.cost_units;
            if cost > limit {
                violations.push(ComplianceViolation {
                    requirement: COST_LIMIT_REQUIREMENT.to_string(),
                    mandatory: false,
                    detail: format!("cost {cost:.2} exceeds request limit {limit:.2}"),
                });
            }
        }

        let verdict = if violations.iter().any(|v| v.mandatory) {
            ComplianceVerdict::Blocked
        } else if violations.is_empty() {
            ComplianceVerdict::Pass
        } else {
            ComplianceVerdict::Flagged
        };

        match verdict {
            ComplianceVerdict::Blocked => {
                let mandatory: Vec<&str> = violations
                    .iter()
                    .filter(|v| v.mandatory)
                    .map(|v| v.requirement.as_str())
                    .collect();
                let error = OrchestratorError::ComplianceBlocked(mandatory.join(", "));
                warn!(request_id = %outcome.request_id, error = %error, "⛔ Result blocked by compliance gate");
            }
            ComplianceVerdict::Flagged => {
                info!(
                    request_id = %outcome.request_id,
                    violations = violations.len(),
                    "Result flagged by compliance gate"
                );
            }
            ComplianceVerdict::Pass => {}
        }

        ComplianceReport { verdict, violations }
    }
}

fn evaluate(requirement: &ComplianceRequirement, outcome: &AggregateOutcome) -> Option<ComplianceViolation> {
    let detail = match &requirement.control {
        ComplianceControl::StageCompleted { stage } => match outcome.stage(*stage) {
            Some(result) if result.is_completed() => return None,
            Some(result) => format!("stage {stage} is {}", result.status),
            None => format!("stage {stage} was not enabled"),
        },
        ComplianceControl::OutputFlag { stage, key } => {
            let flag = outcome
                .stage(*stage)
                .filter(|result| result.is_completed())
                .and_then(|result| result.output.as_ref())
                .and_then(|output| output.get(key))
                .and_then(serde_json::Value::as_bool);
            match flag {
                Some(true) => return None,
                Some(false) => format!("stage {stage} reported {key}=false"),
                None => format!("stage {stage} did not report {key}"),
            }
        }
        ComplianceControl::MinimumQuality { value } => match outcome.blended_score {
            Some(score) if score >= *value => return None,
            score => format!("blended score {} below {value:.2}", describe(score)),
        },
        ComplianceControl::MaximumRisk { value } => match outcome.risk.hallucination_probability {
            Some(probability) if probability <= *value => return None,
            Some(probability) => format!("hallucination probability {probability:.2} above {value:.2}"),
            None => "hallucination probability unknown".to_string(),
        },
        ComplianceControl::MaximumCost { value } => {
            let cost = outcome.total_resource_usage.cost_units;
            if cost <= *value {
                return None;
            }
            format!("cost {cost:.2} above {value:.2}")
        }
    };

    Some(ComplianceViolation {
        requirement: requirement.id.clone(),
        mandatory: requirement.mandatory,
        detail,
    })
}

fn describe(score: Option<f64>) -> String {
    score.map_or_else(|| "undefined".to_string(), |score| format!("{score:.2}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StageResult, StageStatus};
    use crate::orchestration::Aggregator;
    use crate::stage::StageId;
    use serde_json::json;
    use uuid::Uuid;

    fn outcome(quality: f64, output: serde_json::Value) -> AggregateOutcome {
        let mut result = StageResult::pending(StageId(1), "input_validation");
        result.status = StageStatus::Completed;
        result.quality = quality;
        result.output = Some(output);
        Aggregator::new().aggregate(Uuid::new_v4(), vec![result])
    }

    fn constraints(requirements: Vec<ComplianceRequirement>) -> RequestConstraints {
        RequestConstraints {
            compliance: requirements,
            ..RequestConstraints::default()
        }
    }

    #[test]
    fn test_no_requirements_pass() {
        let report = ComplianceGate::new().check(&outcome(0.9, json!({})), &RequestConstraints::default());
        assert_eq!(report.verdict, ComplianceVerdict::Pass);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_mandatory_output_flag_blocks() {
        let requirement = ComplianceRequirement::mandatory(
            "gdpr.pii_redaction",
            ComplianceControl::OutputFlag {
                stage: StageId(1),
                key: "pii_redacted".into(),
            },
        );
        let gate = ComplianceGate::new();

        let blocked = gate.check(&outcome(0.9, json!({"pii_redacted": false})), &constraints(vec![requirement.clone()]));
        assert_eq!(blocked.verdict, ComplianceVerdict::Blocked);
        assert!(blocked.is_blocked());

        let passed = gate.check(&outcome(0.9, json!({"pii_redacted": true})), &constraints(vec![requirement]));
        assert_eq!(passed.verdict, ComplianceVerdict::Pass);
    }

    #[test]
    fn test_advisory_violation_only_flags() {
        let requirement = ComplianceRequirement::advisory(
            "quality.review",
            ComplianceControl::MinimumQuality { value: 0.95 },
        );
        let report = ComplianceGate::new().check(&outcome(0.8, json!({})), &constraints(vec![requirement]));
        assert_eq!(report.verdict, ComplianceVerdict::Flagged);
        assert!(!report.violations[0].mandatory);
    }

    #[test]
    fn test_quality_floor_is_soft() {
        let constraints = RequestConstraints {
            quality_floor: Some(0.9),
            ..RequestConstraints::default()
        };
        let report = ComplianceGate::new().check(&outcome(0.5, json!({})), &constraints);
        assert_eq!(report.verdict, ComplianceVerdict::Flagged);
        assert_eq!(report.violations[0].requirement, QUALITY_FLOOR_REQUIREMENT);
    }

    #[test]
    fn test_missing_stage_fails_stage_completed_control() {
        let requirement = ComplianceRequirement::mandatory(
            "audit.compliance_stage",
            ComplianceControl::StageCompleted { stage: StageId::COMPLIANCE },
        );
        let report = ComplianceGate::new().check(&outcome(0.9, json!({})), &constraints(vec![requirement]));
        assert_eq!(report.verdict, ComplianceVerdict::Blocked);
        assert!(report.violations[0].detail.contains("not enabled"));
    }

    #[test]
    fn test_risk_ceiling() {
        let requirement = ComplianceRequirement::mandatory(
            "risk.ceiling",
            ComplianceControl::MaximumRisk { value: 0.2 },
        );
        let report = ComplianceGate::new().check(&outcome(0.6, json!({})), &constraints(vec![requirement]));
        assert_eq!(report.verdict, ComplianceVerdict::Blocked);
    }
}
