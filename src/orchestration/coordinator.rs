//! # Stage Coordinator
//!
//! Executes the enabled stages of one request wave by wave.
//!
//! ## Execution model
//!
//! - Waves run sequentially; stages within a wave run concurrently on a
//!   `JoinSet`, bounded by a per-wave cap (live `wave_concurrency` tunable,
//!   lowered by the request's resource limits) and by the runtime's global
//!   semaphore.
//! - Each wave gets an equal share of the remaining request budget. Every
//!   stage in the wave must finish within that slice, including retries and
//!   waiting for a permit.
//! - A stage invocation is wrapped in its circuit breaker, then the slice
//!   timeout, then the retry loop. The breaker sees one outcome per logical
//!   invocation, after retries are exhausted; a slice timeout counts as a
//!   failure.
//! - Stage errors and panics become `failed` results and never disturb
//!   siblings. Only a failing stage listed in `blocking_stages` aborts the
//!   remaining waves, whose stages are recorded as `skipped`.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::planner::{self, ExecutionPlan};
use crate::constants::{operations, ABORTED_REASON};
use crate::error::{OrchestratorError, OrchestratorResult, StageError};
use crate::logging::{log_orchestration_operation, log_stage_operation};
use crate::models::{OrchestrationRequest, StageResult, StageStatus};
use crate::resilience::{BackoffPolicy, CircuitBreaker, CircuitBreakerError};
use crate::runtime::{OrchestrationRuntime, StageCache};
use crate::stage::{Stage, StageContext, StageId, StageInput, StageOutput, StageRegistry};

/// Extra time granted to a wave's tasks past the wave deadline before they are aborted
const WAVE_OVERRUN_GRACE: Duration = Duration::from_millis(25);

/// Per-stage results of one request, in plan order
#[derive(Debug, Clone, PartialEq)]
pub struct StageRun {
    pub request_id: Uuid,
    pub results: Vec<StageResult>,
    pub waves: Vec<Vec<StageId>>,
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    registry: Arc<StageRegistry>,
    runtime: Arc<OrchestrationRuntime>,
}

impl Coordinator {
    pub fn new(registry: Arc<StageRegistry>, runtime: Arc<OrchestrationRuntime>) -> Self {
        Self { registry, runtime }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Execute every enabled stage of `request`.
    ///
    /// Fails only with a configuration error (invalid request, unknown stage,
    /// dependency cycle), before any stage runs.
    #[instrument(skip(self, request), fields(request_id = %request.id, stages = request.enabled_stages.len()))]
    pub async fn execute(&self, request: &OrchestrationRequest) -> OrchestratorResult<StageRun> {
        request.validate()?;
        let plan = planner::plan(&self.registry, &request.enabled_stages)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + request.timeout();

        let tunables = self.runtime.tunables();
        let wave_cap = request
            .constraints
            .resource_limits
            .max_concurrent_stages
            .map_or(tunables.wave_concurrency, |limit| limit.min(tunables.wave_concurrency))
            .max(1);
        let policy = BackoffPolicy::from_config(&self.runtime.config().coordinator.retry)
            .with_max_retries(tunables.retry_attempts);

        debug!(
            waves = plan.waves.len(),
            wave_cap,
            retries = tunables.retry_attempts,
            caching = tunables.caching_enabled,
            "Execution plan ready"
        );

        let mut results: BTreeMap<StageId, StageResult> = BTreeMap::new();
        let mut aborted = false;

        for (index, wave) in plan.waves.iter().enumerate() {
            if aborted {
                for id in wave {
                    let result = StageResult::skipped(*id, self.stage_name(*id), ABORTED_REASON);
                    record(&self.runtime, request.id, &result);
                    results.insert(*id, result);
                }
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                for id in wave {
                    let result = timed_out_before_start(*id, self.stage_name(*id));
                    record(&self.runtime, request.id, &result);
                    results.insert(*id, result);
                }
                continue;
            }
            let remaining_waves = (plan.waves.len() - index) as u32;
            let wave_deadline = now + (deadline - now) / remaining_waves;

            let mut executions = Vec::with_capacity(wave.len());
            for id in wave {
                let stage = self.registry.get(*id).ok_or_else(|| {
                    OrchestratorError::Internal(format!("planned stage {id} missing from registry"))
                })?;

                if let Some(error) = unmet_dependency(&plan, *id, &results) {
                    let result = StageResult::skipped(*id, stage.name(), error.to_string());
                    record(&self.runtime, request.id, &result);
                    results.insert(*id, result);
                    continue;
                }

                let input = StageInput {
                    payload: request.payload.clone(),
                    context: request.context.clone(),
                    upstream: plan
                        .upstream_of(*id)
                        .filter_map(|upstream| {
                            results
                                .get(&upstream)
                                .filter(|result| result.is_completed())
                                .and_then(|result| result.output.clone())
                                .map(|output| (upstream, output))
                        })
                        .collect(),
                };

                executions.push(StageExecution {
                    request_id: request.id,
                    breaker: self.runtime.breaker(*id, stage.name()),
                    use_cache: tunables.caching_enabled && stage.cacheable(),
                    stage,
                    input,
                    runtime: self.runtime.clone(),
                    policy,
                    strictness: tunables.validation_strictness,
                });
            }

            let wave_results =
                run_wave(&self.runtime, request.id, executions, wave_deadline, wave_cap).await;
            for result in wave_results {
                if result.status.is_failure()
                    && request.constraints.blocking_stages.contains(&result.stage)
                {
                    aborted = true;
                    warn!(
                        stage = %result.stage_name,
                        status = %result.status,
                        "🚨 Blocking stage failed, aborting remaining waves"
                    );
                    log_orchestration_operation(
                        operations::ORCHESTRATION_ABORTED,
                        &request.id.to_string(),
                        "aborted",
                        Some(&format!("blocking stage {} {}", result.stage_name, result.status)),
                    );
                }
                results.insert(result.stage, result);
            }
        }

        let ordered = plan
            .waves
            .iter()
            .flatten()
            .filter_map(|id| results.remove(id))
            .collect();

        Ok(StageRun {
            request_id: request.id,
            results: ordered,
            waves: plan.waves,
            aborted,
            started_at,
            completed_at: Utc::now(),
            total_duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn stage_name(&self, id: StageId) -> String {
        self.registry
            .get(id)
            .map(|stage| stage.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }
}

/// First hard dependency of `stage` that did not complete, as a skip reason
fn unmet_dependency(
    plan: &ExecutionPlan,
    stage: StageId,
    results: &BTreeMap<StageId, StageResult>,
) -> Option<OrchestratorError> {
    plan.hard_dependencies(stage).find_map(|dependency| {
        let dependency_status = match results.get(&dependency) {
            Some(result) if result.is_completed() => return None,
            Some(result) => result.status.to_string(),
            None => "not_enabled".to_string(),
        };
        Some(OrchestratorError::DependencyUnsatisfied {
            stage,
            dependency,
            dependency_status,
        })
    })
}

async fn run_wave(
    runtime: &OrchestrationRuntime,
    request_id: Uuid,
    executions: Vec<StageExecution>,
    wave_deadline: Instant,
    wave_cap: usize,
) -> Vec<StageResult> {
    if executions.is_empty() {
        return Vec::new();
    }

    let wave_permits = Arc::new(Semaphore::new(wave_cap));
    let mut outstanding: BTreeMap<StageId, String> = BTreeMap::new();
    let mut tasks = JoinSet::new();
    for execution in executions {
        outstanding.insert(execution.stage.id(), execution.stage.name().to_string());
        tasks.spawn(execution.run(wave_permits.clone(), wave_deadline));
    }

    let mut results = Vec::with_capacity(outstanding.len());
    let collect = async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(error) => warn!(error = %error, "Stage task ended without a result"),
            }
        }
    };
    let finished = timeout_at(wave_deadline + WAVE_OVERRUN_GRACE, collect).await.is_ok();
    if !finished {
        warn!("Wave overran its deadline, cancelling remaining stages");
        tasks.abort_all();
    }

    for result in &results {
        outstanding.remove(&result.stage);
    }
    for (stage, name) in outstanding {
        let mut result = StageResult::pending(stage, name);
        result.status = StageStatus::Timeout;
        result.completed_at = Some(Utc::now());
        result.errors.push("cancelled at the request deadline".to_string());
        record(runtime, request_id, &result);
        results.push(result);
    }
    results
}

fn timed_out_before_start(stage: StageId, name: String) -> StageResult {
    let mut result = StageResult::pending(stage, name);
    result.status = StageStatus::Timeout;
    let now = Utc::now();
    result.started_at = Some(now);
    result.completed_at = Some(now);
    result
        .errors
        .push("request deadline elapsed before the stage started".to_string());
    result
}

/// Publish a terminal stage result to the status map and the log
fn record(runtime: &OrchestrationRuntime, request_id: Uuid, result: &StageResult) {
    runtime.record_stage_result(result);

    let operation = match result.status {
        StageStatus::Completed if result.cached => operations::STAGE_CACHE_HIT,
        StageStatus::Completed => operations::STAGE_COMPLETED,
        StageStatus::Skipped => operations::STAGE_SKIPPED,
        StageStatus::Timeout => operations::STAGE_TIMEOUT,
        StageStatus::Failed if result.attempts == 0 => operations::STAGE_SHORT_CIRCUITED,
        _ => operations::STAGE_FAILED,
    };
    let details = result
        .skip_reason
        .as_deref()
        .or_else(|| result.errors.last().map(String::as_str));
    log_stage_operation(
        operation,
        &request_id.to_string(),
        &result.stage_name,
        result.status.as_str(),
        Some(result.duration_ms),
        details,
    );
}

enum InvocationFailure {
    Failed(StageError),
    TimedOut,
}

/// Everything one spawned stage task needs, owned
struct StageExecution {
    request_id: Uuid,
    stage: Arc<dyn Stage>,
    input: StageInput,
    breaker: Arc<CircuitBreaker>,
    runtime: Arc<OrchestrationRuntime>,
    policy: BackoffPolicy,
    strictness: f64,
    use_cache: bool,
}

impl StageExecution {
    async fn run(self, wave_permits: Arc<Semaphore>, deadline: Instant) -> StageResult {
        let id = self.stage.id();
        let started = Instant::now();
        let mut result = StageResult::pending(id, self.stage.name());
        result.input = self.input.to_value();
        result.started_at = Some(Utc::now());

        let fingerprint = self.use_cache.then(|| StageCache::fingerprint(&self.input));
        if let Some(fingerprint) = fingerprint {
            if let Some(output) = self.runtime.stage_cache().get(id, fingerprint) {
                apply_output(&mut result, output);
                result.cached = true;
                return self.finish(result, started);
            }
        }

        let global = self.runtime.semaphore();
        let permits = timeout_at(deadline, async {
            let wave = wave_permits.acquire_owned().await;
            let global = global.acquire_owned().await;
            (wave, global)
        })
        .await;
        let _permits = match permits {
            Ok((Ok(wave), Ok(global))) => (wave, global),
            Ok(_) => {
                result.status = StageStatus::Failed;
                result.errors.push("concurrency limiter closed".to_string());
                return self.finish(result, started);
            }
            Err(_) => {
                result.status = StageStatus::Timeout;
                result
                    .errors
                    .push("timed out waiting for an execution slot".to_string());
                return self.finish(result, started);
            }
        };

        let attempts = AtomicU32::new(0);
        let errors = Mutex::new(Vec::new());
        let invocation = self
            .breaker
            .call(|| async {
                match timeout_at(deadline, self.invoke_with_retries(deadline, &attempts, &errors)).await {
                    Ok(outcome) => outcome.map_err(InvocationFailure::Failed),
                    Err(_) => Err(InvocationFailure::TimedOut),
                }
            })
            .await;

        result.attempts = attempts.load(Ordering::Acquire);
        result.errors = errors.into_inner();
        match invocation {
            Ok(output) => {
                if let Some(fingerprint) = fingerprint {
                    self.runtime.stage_cache().put(id, fingerprint, output.clone());
                }
                apply_output(&mut result, output);
            }
            Err(CircuitBreakerError::CircuitOpen { component }) => {
                result.status = StageStatus::Failed;
                result
                    .errors
                    .push(OrchestratorError::CircuitOpen(component).to_string());
            }
            Err(CircuitBreakerError::OperationFailed(InvocationFailure::Failed(error))) => {
                result.status = StageStatus::Failed;
                let error = OrchestratorError::StageExecution {
                    stage: id,
                    reason: error.to_string(),
                };
                debug!(error = %error, attempts = result.attempts, "Stage invocation exhausted");
            }
            Err(CircuitBreakerError::OperationFailed(InvocationFailure::TimedOut)) => {
                result.status = StageStatus::Timeout;
                result.errors.push(
                    OrchestratorError::Timeout {
                        operation: format!("stage {}", self.stage.name()),
                        elapsed: started.elapsed(),
                    }
                    .to_string(),
                );
            }
        }

        self.finish(result, started)
    }

    /// Run the stage, retrying transient failures with backoff
    async fn invoke_with_retries(
        &self,
        deadline: Instant,
        attempts: &AtomicU32,
        errors: &Mutex<Vec<String>>,
    ) -> Result<StageOutput, StageError> {
        let mut retry = 0;
        loop {
            let attempt = attempts.fetch_add(1, Ordering::AcqRel) + 1;
            let ctx = StageContext {
                request_id: self.request_id,
                stage: self.stage.id(),
                attempt,
                deadline: deadline.into_std(),
                validation_strictness: self.strictness,
            };

            let outcome = AssertUnwindSafe(self.stage.run(&ctx, &self.input))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(StageError::Permanent(panic_message(panic))));

            let error = match outcome {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };
            errors.lock().push(format!("attempt {attempt}: {error}"));

            retry += 1;
            match self.policy.delay_for(retry) {
                Some(delay) if error.is_transient() => {
                    debug!(
                        stage = %self.stage.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient stage failure, retrying"
                    );
                    sleep(delay).await;
                }
                _ => return Err(error),
            }
        }
    }

    fn finish(&self, mut result: StageResult, started: Instant) -> StageResult {
        result.completed_at = Some(Utc::now());
        result.duration_ms = started.elapsed().as_millis() as u64;
        record(&self.runtime, self.request_id, &result);
        result
    }
}

fn apply_output(result: &mut StageResult, output: StageOutput) {
    let report = output.report.clamped();
    result.status = StageStatus::Completed;
    result.quality = report.quality;
    result.accuracy = report.accuracy;
    result.resource_usage = report.resource_usage;
    result.output = Some(output.output);
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("stage panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::models::{Dependency, DependencyStrength, RequestConstraints};
    use crate::test_helpers::ScriptedStage;

    fn coordinator(stages: Vec<ScriptedStage>, config: OrchestratorConfig) -> Coordinator {
        let mut registry = StageRegistry::new();
        for stage in stages {
            registry.register(Arc::new(stage)).unwrap();
        }
        Coordinator::new(
            Arc::new(registry),
            Arc::new(OrchestrationRuntime::new(Arc::new(config))),
        )
    }

    fn request(ids: &[u16], timeout_ms: u64) -> OrchestrationRequest {
        OrchestrationRequest::new(ids.iter().map(|id| StageId(*id)), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let stage = ScriptedStage::succeeding(1, "flaky", 0.9)
            .failing_first(2, StageError::Transient("busy".into()));
        let calls = stage.call_counter();
        let coordinator = coordinator(vec![stage], OrchestratorConfig::for_test());

        let run = coordinator.execute(&request(&[1], 1_000)).await.unwrap();
        let result = &run.results[0];
        assert_eq!(result.status, StageStatus::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let stage = ScriptedStage::failing(1, "broken", StageError::Permanent("bad".into()));
        let calls = stage.call_counter();
        let coordinator = coordinator(vec![stage], OrchestratorConfig::for_test());

        let run = coordinator.execute(&request(&[1], 1_000)).await.unwrap();
        assert_eq!(run.results[0].status, StageStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retried_failure_counts_once_toward_breaker() {
        let mut config = OrchestratorConfig::for_test();
        config.circuit_breakers.failure_threshold = 2;
        let stage = ScriptedStage::failing(1, "flaky", StageError::Transient("down".into()));
        let coordinator = coordinator(vec![stage], config);

        coordinator.execute(&request(&[1], 1_000)).await.unwrap();
        let breaker = coordinator.runtime.breaker(StageId(1), "flaky");
        assert_eq!(breaker.metrics().failure_count, 1);
        assert_eq!(breaker.state(), crate::resilience::CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_panicking_stage_becomes_failed_result() {
        let panicking = ScriptedStage::panicking(1, "explodes");
        let sibling = ScriptedStage::succeeding(2, "calm", 0.8);
        let coordinator = coordinator(vec![panicking, sibling], OrchestratorConfig::for_test());

        let run = coordinator.execute(&request(&[1, 2], 1_000)).await.unwrap();
        assert_eq!(run.results[0].status, StageStatus::Failed);
        assert!(run.results[0].errors[0].contains("panicked"));
        assert_eq!(run.results[1].status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_blocking_stage_failure_aborts_remaining_waves() {
        let first = ScriptedStage::failing(1, "gate", StageError::Permanent("denied".into()));
        let second = ScriptedStage::succeeding(2, "after", 0.9).with_dependency(Dependency::new(
            StageId(2),
            [StageId(1)],
            DependencyStrength::Weak,
            false,
        ));
        let second_calls = second.call_counter();
        let coordinator = coordinator(vec![first, second], OrchestratorConfig::for_test());

        let mut constraints = RequestConstraints::default();
        constraints.blocking_stages.insert(StageId(1));
        let request = request(&[1, 2], 1_000).with_constraints(constraints);

        let run = coordinator.execute(&request).await.unwrap();
        assert!(run.aborted);
        assert_eq!(run.results[1].status, StageStatus::Skipped);
        assert_eq!(run.results[1].skip_reason.as_deref(), Some(ABORTED_REASON));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upstream_outputs_are_passed_downstream() {
        let first = ScriptedStage::succeeding(1, "first", 0.9);
        let second = ScriptedStage::succeeding(2, "second", 0.9).with_dependency(Dependency::new(
            StageId(2),
            [StageId(1)],
            DependencyStrength::Strong,
            true,
        ));
        let coordinator = coordinator(vec![first, second], OrchestratorConfig::for_test());

        let run = coordinator.execute(&request(&[1, 2], 1_000)).await.unwrap();
        let input = &run.results[1].input;
        assert_eq!(input["upstream"]["1"]["stage"], "first");
    }

    #[tokio::test]
    async fn test_cacheable_stage_served_from_cache() {
        let stage = ScriptedStage::succeeding(1, "cached", 0.7).cacheable();
        let calls = stage.call_counter();
        let coordinator = coordinator(vec![stage], OrchestratorConfig::for_test());
        coordinator
            .runtime
            .update_tunables(|tunables| tunables.caching_enabled = true);

        let request = request(&[1], 1_000);
        coordinator.execute(&request).await.unwrap();
        let run = coordinator.execute(&request).await.unwrap();

        assert!(run.results[0].cached);
        assert_eq!(run.results[0].status, StageStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_runs_nothing() {
        let stage = ScriptedStage::succeeding(1, "a", 1.0);
        let calls = stage.call_counter();
        let coordinator = coordinator(vec![stage], OrchestratorConfig::for_test());

        let err = coordinator.execute(&request(&[1], 0)).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
