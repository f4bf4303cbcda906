//! # Orchestrator
//!
//! Caller-facing entry point. One request flows one way:
//!
//! ```text
//! validate -> refresh health if stale -> Coordinator -> Aggregator
//!          -> ComplianceGate -> Monitor -> Optimizer proposals
//!          -> archive -> OrchestrationResult
//!                    \-> persist (spawned, off the response path)
//! ```
//!
//! Independently of request traffic, [`Orchestrator::start`] runs a
//! background loop that probes health, feeds the monitor and escalates
//! overdue critical alerts every `health.probe_interval_ms`.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use veracity_core::config::OrchestratorConfig;
//! use veracity_core::models::OrchestrationRequest;
//! use veracity_core::orchestration::Orchestrator;
//! use veracity_core::stage::StageId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::with_default_stages(OrchestratorConfig::default())?;
//! orchestrator.start().await?;
//!
//! let request = OrchestrationRequest::new(
//!     [StageId::INPUT_VALIDATION, StageId::RESPONSE_VALIDATION],
//!     Duration::from_secs(5),
//! )
//! .with_payload(serde_json::json!({"message": "What is the boiling point of water?"}));
//! let result = orchestrator.orchestrate(request).await?;
//! println!("{} {:?}", result.status, result.blended_score);
//!
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::aggregator::{Aggregator, RiskModel};
use super::compliance::ComplianceGate;
use super::coordinator::Coordinator;
use crate::config::OrchestratorConfig;
use crate::constants::operations;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::health::{HealthChecker, HealthProbe};
use crate::logging::log_orchestration_operation;
use crate::models::{
    AggregateOutcome, Alert, HealthSnapshot, OrchestrationRequest, OrchestrationResult,
};
use crate::monitoring::{AlertSink, LogAlertSink, Monitor, PerformanceTrend, QueuedAlertSink};
use crate::optimization::Optimizer;
use crate::persistence::{AuditWriter, InMemoryResultStore, ResultStore};
use crate::resilience::BackoffPolicy;
use crate::runtime::OrchestrationRuntime;
use crate::stage::{builtin, StageRegistry};

/// Extra time `stop` waits for an in-flight monitoring cycle before aborting it
const STOP_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    config: Option<OrchestratorConfig>,
    registry: StageRegistry,
    probes: Vec<Arc<dyn HealthProbe>>,
    store: Option<Arc<dyn ResultStore>>,
    sinks: Vec<Arc<dyn AlertSink>>,
    risk_model: Option<Arc<dyn RiskModel>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn risk_model(mut self, risk_model: Arc<dyn RiskModel>) -> Self {
        self.risk_model = Some(risk_model);
        self
    }

    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let config = Arc::new(config);
        let runtime = Arc::new(OrchestrationRuntime::new(config.clone()));
        let registry = Arc::new(self.registry);

        let monitor = Arc::new(Monitor::new(runtime.clone()));
        let alert_queue = Arc::new(QueuedAlertSink::new(config.monitor.alert_queue_capacity));
        monitor.add_sink(Arc::new(LogAlertSink));
        monitor.add_sink(alert_queue.clone());
        for sink in self.sinks {
            monitor.add_sink(sink);
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryResultStore::new()));
        let audit = AuditWriter::new(
            store,
            config.history.persistence_write_attempts,
            config.history.persistence_write_timeout(),
            BackoffPolicy::from_config(&config.coordinator.retry),
        );

        let aggregator = match self.risk_model {
            Some(model) => Aggregator::with_risk_model(model),
            None => Aggregator::new(),
        };

        info!(
            stages = registry.len(),
            probes = self.probes.len(),
            "🚀 ORCHESTRATOR: Initialized"
        );

        Ok(Orchestrator {
            coordinator: Coordinator::new(registry.clone(), runtime.clone()),
            health: Arc::new(HealthChecker::new(
                config.health.clone(),
                registry,
                runtime.clone(),
                self.probes,
            )),
            aggregator,
            compliance: ComplianceGate::new(),
            optimizer: Arc::new(Optimizer::new(runtime.clone(), monitor.clone())),
            monitor,
            alert_queue,
            audit,
            runtime,
            background: parking_lot::Mutex::new(None),
        })
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    runtime: Arc<OrchestrationRuntime>,
    coordinator: Coordinator,
    health: Arc<HealthChecker>,
    aggregator: Aggregator,
    compliance: ComplianceGate,
    monitor: Arc<Monitor>,
    optimizer: Arc<Optimizer>,
    alert_queue: Arc<QueuedAlertSink>,
    audit: AuditWriter,
    background: parking_lot::Mutex<Option<BackgroundLoop>>,
}

/// Handle on a running monitoring loop and its shutdown signal
#[derive(Debug)]
struct BackgroundLoop {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Orchestrator with the four default stages registered
    pub fn with_default_stages(config: OrchestratorConfig) -> OrchestratorResult<Self> {
        let mut registry = StageRegistry::new();
        builtin::register_defaults(&mut registry)?;
        Self::builder().config(config).registry(registry).build()
    }

    pub fn runtime(&self) -> &Arc<OrchestrationRuntime> {
        &self.runtime
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        &self.optimizer
    }

    /// Run one request end to end.
    ///
    /// Returns `Err` only for configuration errors, before any stage runs.
    /// Stage failures, timeouts, skips and compliance blocks are all part
    /// of the returned result.
    #[instrument(skip(self, request), fields(request_id = %request.id, priority = ?request.priority))]
    pub async fn orchestrate(&self, request: OrchestrationRequest) -> OrchestratorResult<OrchestrationResult> {
        let request_id = request.id.to_string();
        log_orchestration_operation(
            operations::ORCHESTRATION_STARTED,
            &request_id,
            "started",
            Some(&format!("{} stages", request.enabled_stages.len())),
        );

        if let Err(error) = request.validate() {
            log_orchestration_operation(
                operations::ORCHESTRATION_REJECTED,
                &request_id,
                "rejected",
                Some(&error.to_string()),
            );
            return Err(error);
        }

        let health = self.health.snapshot().await;

        let run = match self.coordinator.execute(&request).await {
            Ok(run) => run,
            Err(error) => {
                log_orchestration_operation(
                    operations::ORCHESTRATION_REJECTED,
                    &request_id,
                    "rejected",
                    Some(&error.to_string()),
                );
                return Err(error);
            }
        };
        let started_at = run.started_at;
        let completed_at = run.completed_at;

        let outcome = self.aggregator.aggregate_run(run);
        let compliance = self.compliance.check(&outcome, &request.constraints);
        let alerts = self.monitor.observe(&outcome).await;
        let proposals = self.optimizer.propose(&outcome, &health);

        let output = (!compliance.is_blocked()).then(|| completed_outputs(&outcome));
        let timings: BTreeMap<_, _> = outcome
            .stage_results
            .iter()
            .map(|result| (result.stage, result.duration_ms))
            .collect();

        let result = OrchestrationResult {
            request_id: request.id,
            priority: request.priority,
            status: outcome.status,
            blended_score: outcome.blended_score,
            risk: outcome.risk,
            stage_results: outcome.stage_results,
            alerts,
            proposals,
            compliance,
            timings,
            output,
            aborted: outcome.aborted,
            started_at,
            completed_at,
            total_duration_ms: outcome.total_duration_ms,
        };

        let archived = Arc::new(result.clone());
        self.audit.spawn_write(archived.clone());
        self.runtime.push_history(archived);

        if self.optimizer.auto_apply() {
            if let Some(best) = result.proposals.first().cloned() {
                self.spawn_optimization(best);
            }
        }

        log_orchestration_operation(
            operations::ORCHESTRATION_COMPLETED,
            &request_id,
            result.status.as_str(),
            Some(&format!(
                "completed={} failed={} timed_out={} skipped={} compliance={:?} duration_ms={}",
                outcome.completed,
                outcome.failed,
                outcome.timed_out,
                outcome.skipped,
                result.compliance.verdict,
                result.total_duration_ms
            )),
        );
        Ok(result)
    }

    /// Cached health snapshot, refreshed when stale
    pub async fn get_health(&self) -> Arc<HealthSnapshot> {
        self.health.snapshot().await
    }

    /// Most recent results first, from the in-memory history
    pub fn get_history(&self, limit: usize) -> Vec<Arc<OrchestrationResult>> {
        self.runtime.history(limit)
    }

    /// Look a result up in the history, then in the result store
    pub async fn get_result(&self, request_id: Uuid) -> OrchestratorResult<Option<OrchestrationResult>> {
        if let Some(result) = self.runtime.history_entry(request_id) {
            return Ok(Some(result.as_ref().clone()));
        }
        self.audit.store().get_result(request_id).await
    }

    pub fn acknowledge_alert(&self, alert_id: Uuid) -> OrchestratorResult<Alert> {
        self.runtime.alerts().acknowledge(alert_id)
    }

    pub fn resolve_alert(&self, alert_id: Uuid) -> OrchestratorResult<Alert> {
        self.runtime.alerts().resolve(alert_id)
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.runtime.alerts().active()
    }

    /// Alerts queued for a downstream notifier since the last drain
    pub fn drain_alert_queue(&self) -> Vec<Alert> {
        self.alert_queue.drain()
    }

    pub fn trends(&self) -> Vec<PerformanceTrend> {
        self.monitor.trends()
    }

    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Start the background health and escalation loop
    pub async fn start(&self) -> OrchestratorResult<()> {
        let mut background = self.background.lock();
        if background.is_some() {
            return Err(OrchestratorError::Internal(
                "background monitoring loop is already running".to_string(),
            ));
        }

        let interval = self.runtime.config().health.probe_interval();
        let health = self.health.clone();
        let monitor = self.monitor.clone();
        let audit = self.audit.clone();
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        info!(interval_ms = interval.as_millis() as u64, "🔄 ORCHESTRATOR: Starting background monitoring loop");
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        monitoring_cycle(&health, &monitor, &audit).await;
                    }
                    _ = signal.notified() => {
                        info!("Background monitoring loop shutting down");
                        break;
                    }
                }
            }
        });
        *background = Some(BackgroundLoop { handle, shutdown });
        Ok(())
    }

    /// Stop the background loop. A cycle in flight gets a short grace period
    /// and the loop exits as soon as it finishes.
    pub async fn stop(&self) {
        let Some(BackgroundLoop { mut handle, shutdown }) = self.background.lock().take() else {
            debug!("Background monitoring loop not running");
            return;
        };
        // Stores a permit when the loop is mid-cycle rather than waiting
        shutdown.notify_one();

        let grace = self.runtime.config().health.probe_timeout() + STOP_GRACE;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("Background monitoring loop did not stop in time, aborting");
            handle.abort();
        }
        info!("🛑 ORCHESTRATOR: Background monitoring loop stopped");
    }

    fn spawn_optimization(&self, proposal: crate::models::OptimizationProposal) {
        let optimizer = self.optimizer.clone();
        tokio::spawn(async move {
            match optimizer.apply_and_validate(proposal).await {
                Ok(proposal) => {
                    debug!(proposal_id = %proposal.id, state = ?proposal.state, "Auto-applied optimization finished")
                }
                Err(OrchestratorError::OptimizationInFlight(id)) => {
                    debug!(proposal_id = %id, "Optimization already in flight, proposal dropped")
                }
                Err(error) => warn!(error = %error, "Auto-applied optimization failed"),
            }
        });
    }
}

async fn monitoring_cycle(health: &HealthChecker, monitor: &Monitor, audit: &AuditWriter) {
    let snapshot = health.probe().await;
    let mut alerts = monitor.observe_health(&snapshot).await;
    alerts.extend(monitor.escalate().await);
    for alert in &alerts {
        audit.write_alert(alert).await;
    }
    debug!(
        overall = %snapshot.overall,
        alerts = alerts.len(),
        "Monitoring cycle complete"
    );
}

/// Outputs of completed stages keyed by stage name
fn completed_outputs(outcome: &AggregateOutcome) -> Value {
    let outputs: Map<String, Value> = outcome
        .stage_results
        .iter()
        .filter(|result| result.is_completed())
        .filter_map(|result| {
            result
                .output
                .clone()
                .map(|output| (result.stage_name.clone(), output))
        })
        .collect();
    Value::Object(outputs)
}
