//! # Result Aggregation
//!
//! Merges per-stage results into one [`AggregateOutcome`]:
//!
//! - `success` when every non-skipped stage completed (vacuously for an
//!   empty request), `partial` when at least half of the enabled stages
//!   completed, otherwise `failure`. A request where nothing completed is a
//!   failure even if every stage was skipped.
//! - The blended score is the mean quality of completed stages only, and is
//!   `None` when nothing completed.
//! - Hallucination risk comes from a pluggable [`RiskModel`].

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::coordinator::StageRun;
use crate::models::{
    AggregateOutcome, OverallStatus, ResourceUsage, RiskEstimate, RiskLevel, StageResult,
    StageStatus,
};

/// Turns stage results into a hallucination risk estimate
pub trait RiskModel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn estimate(&self, results: &[StageResult], blended_score: Option<f64>) -> RiskEstimate;
}

/// Placeholder model: `probability = 1 - blended score`.
///
/// Monotonic in quality but uncalibrated. Replace it with a calibrated
/// model by passing another [`RiskModel`] to [`Aggregator::with_risk_model`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InverseQualityRisk;

impl RiskModel for InverseQualityRisk {
    fn name(&self) -> &str {
        "inverse_quality_placeholder"
    }

    fn estimate(&self, _results: &[StageResult], blended_score: Option<f64>) -> RiskEstimate {
        let probability = blended_score.map(|score| (1.0 - score).clamp(0.0, 1.0));
        let level = match probability {
            None => RiskLevel::Unknown,
            Some(p) if p < 0.25 => RiskLevel::Low,
            Some(p) if p < 0.5 => RiskLevel::Medium,
            Some(_) => RiskLevel::High,
        };
        RiskEstimate {
            hallucination_probability: probability,
            level,
            model: self.name().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    risk_model: Arc<dyn RiskModel>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::with_risk_model(Arc::new(InverseQualityRisk))
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_risk_model(risk_model: Arc<dyn RiskModel>) -> Self {
        Self { risk_model }
    }

    /// Aggregate a coordinator run, keeping its wall-clock duration and abort flag
    pub fn aggregate_run(&self, run: StageRun) -> AggregateOutcome {
        let mut outcome = self.aggregate(run.request_id, run.results);
        outcome.aborted = run.aborted;
        outcome.total_duration_ms = run.total_duration_ms;
        outcome
    }

    pub fn aggregate(&self, request_id: Uuid, results: Vec<StageResult>) -> AggregateOutcome {
        let count = |status: StageStatus| results.iter().filter(|r| r.status == status).count();
        let enabled = results.len();
        let completed = count(StageStatus::Completed);
        let failed = count(StageStatus::Failed);
        let timed_out = count(StageStatus::Timeout);
        let skipped = count(StageStatus::Skipped);

        let status = classify(enabled, completed, skipped);

        let completed_results: Vec<&StageResult> = results.iter().filter(|r| r.is_completed()).collect();
        let blended_score = mean(completed_results.iter().map(|r| r.quality));
        let mean_accuracy = mean(completed_results.iter().map(|r| r.accuracy));

        let mut total_resource_usage = ResourceUsage::default();
        for result in &results {
            total_resource_usage += result.resource_usage;
        }

        let risk = self.risk_model.estimate(&results, blended_score);

        AggregateOutcome {
            request_id,
            status,
            blended_score,
            mean_accuracy,
            risk,
            enabled,
            completed,
            failed,
            timed_out,
            skipped,
            total_resource_usage,
            total_duration_ms: wall_clock_ms(&results),
            aborted: false,
            stage_results: results,
        }
    }
}

fn classify(enabled: usize, completed: usize, skipped: usize) -> OverallStatus {
    if enabled == 0 {
        return OverallStatus::Success;
    }
    if completed == 0 {
        return OverallStatus::Failure;
    }
    if completed == enabled - skipped {
        OverallStatus::Success
    } else if completed * 2 >= enabled {
        OverallStatus::Partial
    } else {
        OverallStatus::Failure
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn wall_clock_ms(results: &[StageResult]) -> u64 {
    let start = results.iter().filter_map(|r| r.started_at).min();
    let end = results.iter().filter_map(|r| r.completed_at).max();
    match (start, end) {
        (Some(start), Some(end)) => end.signed_duration_since(start).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageId;

    fn result(id: u16, status: StageStatus, quality: f64) -> StageResult {
        let mut result = StageResult::pending(StageId(id), format!("s{id}"));
        result.status = status;
        result.quality = quality;
        result.accuracy = quality;
        result
    }

    #[test]
    fn test_blended_score_is_mean_of_completed() {
        let outcome = Aggregator::new().aggregate(
            Uuid::new_v4(),
            vec![
                result(1, StageStatus::Completed, 0.8),
                result(2, StageStatus::Completed, 0.6),
            ],
        );
        assert_eq!(outcome.status, OverallStatus::Success);
        assert!((outcome.blended_score.unwrap() - 0.7).abs() < 1e-9);
        let probability = outcome.risk.hallucination_probability.unwrap();
        assert!((probability - 0.3).abs() < 1e-9);
        assert_eq!(outcome.risk.level, RiskLevel::Medium);
    }

    #[test]
    fn test_failed_stages_excluded_from_score() {
        let outcome = Aggregator::new().aggregate(
            Uuid::new_v4(),
            vec![
                result(1, StageStatus::Completed, 0.9),
                result(2, StageStatus::Failed, 0.0),
            ],
        );
        assert_eq!(outcome.status, OverallStatus::Partial);
        assert!((outcome.blended_score.unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_empty_request_is_success_with_no_score() {
        let outcome = Aggregator::new().aggregate(Uuid::new_v4(), Vec::new());
        assert_eq!(outcome.status, OverallStatus::Success);
        assert_eq!(outcome.blended_score, None);
        assert_eq!(outcome.risk.level, RiskLevel::Unknown);
    }

    #[test]
    fn test_status_classification() {
        use StageStatus::*;
        let status = |statuses: &[StageStatus]| {
            let results = statuses
                .iter()
                .enumerate()
                .map(|(i, s)| result(i as u16 + 1, *s, 0.5))
                .collect();
            Aggregator::new().aggregate(Uuid::new_v4(), results).status
        };

        assert_eq!(status(&[Failed]), OverallStatus::Failure);
        assert_eq!(status(&[Completed, Timeout]), OverallStatus::Partial);
        assert_eq!(status(&[Completed, Failed, Failed, Failed]), OverallStatus::Failure);
        assert_eq!(status(&[Completed, Completed, Failed, Failed]), OverallStatus::Partial);
        assert_eq!(status(&[Completed, Skipped]), OverallStatus::Success);
        assert_eq!(status(&[Failed, Skipped]), OverallStatus::Failure);
        assert_eq!(status(&[Skipped, Skipped]), OverallStatus::Failure);
    }

    #[derive(Debug)]
    struct FixedRisk;

    impl RiskModel for FixedRisk {
        fn name(&self) -> &str {
            "fixed"
        }

        fn estimate(&self, _results: &[StageResult], _blended: Option<f64>) -> RiskEstimate {
            RiskEstimate {
                hallucination_probability: Some(0.9),
                level: RiskLevel::High,
                model: "fixed".into(),
            }
        }
    }

    #[test]
    fn test_custom_risk_model() {
        let aggregator = Aggregator::with_risk_model(Arc::new(FixedRisk));
        let outcome = aggregator.aggregate(Uuid::new_v4(), vec![result(1, StageStatus::Completed, 1.0)]);
        assert_eq!(outcome.risk.model, "fixed");
        assert_eq!(outcome.risk.level, RiskLevel::High);
    }
}
