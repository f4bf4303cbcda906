//! # Optimizer
//!
//! Proposes bounded changes to the runtime [`Tunables`](super::Tunables)
//! from monitor output and applies them one at a time under a
//! validate-then-rollback discipline:
//!
//! 1. [`Optimizer::apply`] takes the global optimization lock (bounded
//!    wait), records the prior values and the target metric's current
//!    rolling value.
//! 2. [`Optimizer::validate`] waits the observation window and compares the
//!    samples observed since the apply against that value.
//! 3. A regression beyond `rollback_tolerance` restores the prior values
//!    and marks the proposal reverted.
//!
//! The lock is held by the [`AppliedChange`] until it is consumed, so a
//! second change can never be attributed to the same observation window.

use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::{MetricThresholds, OptimizerConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{
    AggregateOutcome, HealthSnapshot, HealthStatus, MetricKind, OptimizationProposal,
    ProposalState, TunableChange, ValidationOutcome,
};
use crate::monitoring::Monitor;
use crate::runtime::OrchestrationRuntime;

/// Largest benefit any single rule claims
const MAX_ESTIMATED_BENEFIT: f64 = 0.5;
const CACHE_COST: f64 = 0.2;
const RETRY_COST_PER_ATTEMPT: f64 = 0.1;

/// A change that has been applied and still holds the optimization lock
#[derive(Debug)]
pub struct AppliedChange {
    proposal: OptimizationProposal,
    prior: Vec<TunableChange>,
    before: f64,
    mark: u64,
    _guard: OwnedMutexGuard<()>,
}

impl AppliedChange {
    pub fn proposal(&self) -> &OptimizationProposal {
        &self.proposal
    }

    /// Values the change replaced, in application order
    pub fn prior(&self) -> &[TunableChange] {
        &self.prior
    }

    /// Release the optimization lock and return the final proposal
    pub fn into_proposal(self) -> OptimizationProposal {
        self.proposal
    }
}

#[derive(Debug)]
pub struct Optimizer {
    config: OptimizerConfig,
    thresholds: MetricThresholds,
    runtime: Arc<OrchestrationRuntime>,
    monitor: Arc<Monitor>,
}

impl Optimizer {
    pub fn new(runtime: Arc<OrchestrationRuntime>, monitor: Arc<Monitor>) -> Self {
        Self {
            config: runtime.config().optimizer.clone(),
            thresholds: runtime.config().monitor.thresholds.clone(),
            runtime,
            monitor,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn auto_apply(&self) -> bool {
        self.config.enabled && self.config.auto_apply
    }

    /// Proposals worth applying, best estimated benefit first
    pub fn propose(&self, outcome: &AggregateOutcome, health: &HealthSnapshot) -> Vec<OptimizationProposal> {
        if !self.config.enabled {
            return Vec::new();
        }
        let tunables = self.runtime.tunables();
        let mut proposals = Vec::new();

        let latency = self
            .monitor
            .rolling_value(MetricKind::Latency)
            .unwrap_or(outcome.total_duration_ms as f64);
        let target = self.config.latency_target_ms;
        if latency > target && !tunables.caching_enabled {
            proposals.push(
                OptimizationProposal::new(
                    MetricKind::Latency,
                    latency,
                    target,
                    self.thresholds.latency_ms,
                    TunableChange::CachingEnabled(true),
                )
                .with_estimates(((latency - target) / latency).min(MAX_ESTIMATED_BENEFIT), CACHE_COST)
                .with_rationale(format!("latency {latency:.0}ms over target {target:.0}ms")),
            );
        }

        let quality = self.monitor.rolling_value(MetricKind::Quality).or(outcome.blended_score);
        let target = self.config.quality_target;
        if let Some(quality) = quality.filter(|q| *q < target) {
            if tunables.validation_strictness < self.config.max_strictness {
                let strictness = (tunables.validation_strictness + self.config.strictness_step)
                    .min(self.config.max_strictness);
                let benefit = if target > 0.0 { (target - quality) / target } else { 0.0 };
                proposals.push(
                    OptimizationProposal::new(
                        MetricKind::Quality,
                        quality,
                        target,
                        self.thresholds.quality,
                        TunableChange::ValidationStrictness(strictness),
                    )
                    .with_estimates(
                        benefit.min(MAX_ESTIMATED_BENEFIT),
                        strictness - tunables.validation_strictness,
                    )
                    .with_rationale(format!("quality {quality:.2} below target {target:.2}")),
                );
            }
        }

        let error_rate = self
            .monitor
            .rolling_value(MetricKind::ErrorRate)
            .unwrap_or_else(|| outcome.error_rate());
        let threshold = self.thresholds.error_rate;
        if error_rate > threshold && tunables.retry_attempts < self.config.max_retry_attempts {
            let attempts = tunables.retry_attempts + 1;
            proposals.push(
                OptimizationProposal::new(
                    MetricKind::ErrorRate,
                    error_rate,
                    threshold,
                    threshold,
                    TunableChange::RetryAttempts(attempts),
                )
                .with_estimates(
                    ((error_rate - threshold) / error_rate).min(MAX_ESTIMATED_BENEFIT),
                    RETRY_COST_PER_ATTEMPT * attempts as f64,
                )
                .with_rationale(format!("error rate {error_rate:.2} over {threshold:.2}")),
            );
        }

        if health.overall >= HealthStatus::Degraded
            && tunables.wave_concurrency > self.config.min_wave_concurrency
        {
            let concurrency = (tunables.wave_concurrency / 2).max(self.config.min_wave_concurrency);
            let benefit = match health.overall {
                HealthStatus::Degraded => 0.1,
                HealthStatus::Unhealthy => 0.2,
                _ => 0.3,
            };
            proposals.push(
                OptimizationProposal::new(
                    MetricKind::Availability,
                    health.availability(),
                    self.thresholds.availability,
                    self.thresholds.availability,
                    TunableChange::WaveConcurrency(concurrency),
                )
                .with_estimates(benefit, 0.0)
                .with_rationale(format!("system health is {}", health.overall)),
            );
        }

        proposals.retain(|proposal| {
            let keep = proposal.estimated_benefit > self.config.min_improvement
                && proposal.estimated_cost <= self.config.resource_budget;
            if !keep {
                debug!(
                    metric = %proposal.target_metric,
                    benefit = proposal.estimated_benefit,
                    cost = proposal.estimated_cost,
                    "Discarding optimization proposal"
                );
            }
            keep
        });
        proposals.sort_by(|a, b| b.estimated_benefit.total_cmp(&a.estimated_benefit));
        proposals
    }

    /// Apply one proposal while holding the global optimization lock
    pub async fn apply(&self, mut proposal: OptimizationProposal) -> OrchestratorResult<AppliedChange> {
        let lock = self.runtime.optimization_lock();
        let guard = tokio::time::timeout(self.config.apply_lock_timeout(), lock.lock_owned())
            .await
            .map_err(|_| OrchestratorError::OptimizationInFlight(proposal.id.to_string()))?;

        let metric = proposal.target_metric;
        let before = self.monitor.rolling_value(metric).unwrap_or(proposal.current_value);
        let mark = self.monitor.sample_mark(metric);
        let prior = self.runtime.update_tunables(|tunables| {
            proposal
                .changes
                .iter()
                .map(|change| tunables.apply(*change))
                .collect::<Vec<_>>()
        });
        proposal.state = ProposalState::Applied;

        info!(
            proposal_id = %proposal.id,
            metric = %metric,
            changes = ?proposal.changes,
            before = before,
            "🔧 OPTIMIZER: Applied change"
        );

        Ok(AppliedChange {
            proposal,
            prior,
            before,
            mark,
            _guard: guard,
        })
    }

    /// Wait the observation window and keep or roll back the change
    pub async fn validate(&self, change: &mut AppliedChange) -> bool {
        tokio::time::sleep(self.config.observation_window()).await;

        let metric = change.proposal.target_metric;
        let before = change.before;
        let after = match self.monitor.mean_since(metric, change.mark) {
            Some(after) => after,
            None => {
                debug!(proposal_id = %change.proposal.id, "No samples in observation window");
                before
            }
        };
        let worsened = if metric.higher_is_better() {
            before - after
        } else {
            after - before
        };
        let regression = if before.abs() > f64::EPSILON {
            (worsened / before.abs()).max(0.0)
        } else {
            worsened.max(0.0)
        };
        let passed = regression <= self.config.rollback_tolerance;

        change.proposal.validation = Some(ValidationOutcome {
            before,
            after,
            regression,
            passed,
        });
        change.proposal.state = ProposalState::Validated;

        if passed {
            change.proposal.state = ProposalState::Kept;
            info!(
                proposal_id = %change.proposal.id,
                metric = %metric,
                before = before,
                after = after,
                "✅ OPTIMIZER: Change kept"
            );
        } else {
            self.rollback(change);
        }
        passed
    }

    /// Restore the values the change replaced
    pub fn rollback(&self, change: &mut AppliedChange) {
        self.runtime.update_tunables(|tunables| {
            for prior in change.prior.iter().rev() {
                tunables.apply(*prior);
            }
        });
        change.proposal.state = ProposalState::Reverted;
        warn!(
            proposal_id = %change.proposal.id,
            metric = %change.proposal.target_metric,
            restored = ?change.prior,
            "⏪ OPTIMIZER: Change rolled back"
        );
    }

    pub async fn apply_and_validate(&self, proposal: OptimizationProposal) -> OrchestratorResult<OptimizationProposal> {
        let mut change = self.apply(proposal).await?;
        self.validate(&mut change).await;
        Ok(change.into_proposal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::models::{StageResult, StageStatus};
    use crate::orchestration::Aggregator;
    use crate::stage::StageId;
    use uuid::Uuid;

    fn optimizer() -> Optimizer {
        let runtime = Arc::new(OrchestrationRuntime::new(Arc::new(OrchestratorConfig::for_test())));
        let monitor = Arc::new(Monitor::new(runtime.clone()));
        Optimizer::new(runtime, monitor)
    }

    fn outcome(quality: f64, duration_ms: u64) -> AggregateOutcome {
        let mut result = StageResult::pending(StageId(1), "input_validation");
        result.status = StageStatus::Completed;
        result.quality = quality;
        let mut outcome = Aggregator::new().aggregate(Uuid::new_v4(), vec![result]);
        outcome.total_duration_ms = duration_ms;
        outcome
    }

    #[test]
    fn test_slow_request_proposes_caching() {
        let optimizer = optimizer();
        let proposals = optimizer.propose(&outcome(0.9, 8_000), &HealthSnapshot::initial());

        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].changes, vec![TunableChange::CachingEnabled(true)]);
        assert_eq!(proposals[0].target_metric, MetricKind::Latency);
        assert!(proposals[0].estimated_benefit > 0.05);
    }

    #[test]
    fn test_proposals_sorted_and_filtered() {
        let optimizer = optimizer();
        let proposals = optimizer.propose(&outcome(0.3, 8_000), &HealthSnapshot::initial());

        assert_eq!(proposals.len(), 2);
        assert!(proposals[0].estimated_benefit >= proposals[1].estimated_benefit);
        assert!(proposals.iter().all(|p| p.estimated_cost <= 1.0));

        let healthy = optimizer.propose(&outcome(0.9, 10), &HealthSnapshot::initial());
        assert!(healthy.is_empty());
    }

    #[tokio::test]
    async fn test_second_apply_waits_then_fails() {
        let optimizer = optimizer();
        let proposals = optimizer.propose(&outcome(0.3, 8_000), &HealthSnapshot::initial());

        let held = optimizer.apply(proposals[0].clone()).await.unwrap();
        let contended = optimizer.apply(proposals[1].clone()).await;
        assert!(matches!(contended, Err(OrchestratorError::OptimizationInFlight(_))));

        drop(held.into_proposal());
        assert!(optimizer.apply(proposals[1].clone()).await.is_ok());
    }

    #[tokio::test]
    async fn test_regression_rolls_back() {
        let optimizer = optimizer();
        let health = HealthSnapshot::initial();
        optimizer.monitor.observe(&outcome(0.5, 10)).await;

        let proposal = optimizer
            .propose(&outcome(0.5, 10), &health)
            .into_iter()
            .find(|p| p.target_metric == MetricKind::Quality)
            .unwrap();
        let mut change = optimizer.apply(proposal).await.unwrap();
        assert!((optimizer.runtime.tunables().validation_strictness - 0.6).abs() < 1e-9);

        optimizer.monitor.observe(&outcome(0.2, 10)).await;
        assert!(!optimizer.validate(&mut change).await);

        let proposal = change.into_proposal();
        assert_eq!(proposal.state, ProposalState::Reverted);
        assert!(!proposal.validation.unwrap().passed);
        assert!((optimizer.runtime.tunables().validation_strictness - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_improvement_is_kept() {
        let optimizer = optimizer();
        let health = HealthSnapshot::initial();
        optimizer.monitor.observe(&outcome(0.5, 10)).await;

        let proposal = optimizer
            .propose(&outcome(0.5, 10), &health)
            .into_iter()
            .find(|p| p.target_metric == MetricKind::Quality)
            .unwrap();
        let mut change = optimizer.apply(proposal).await.unwrap();
        optimizer.monitor.observe(&outcome(0.8, 10)).await;

        assert!(optimizer.validate(&mut change).await);
        assert_eq!(change.proposal().state, ProposalState::Kept);
        assert!((optimizer.runtime.tunables().validation_strictness - 0.6).abs() < 1e-9);
    }
}
