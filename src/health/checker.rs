//! # Health Checker
//!
//! Probes every registered stage and infrastructure dependency concurrently,
//! each under its own timeout, and caches the resulting snapshot in the
//! runtime. A probe that errors or times out marks its component
//! `unhealthy`; it never fails the checker itself.

use chrono::Utc;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::probe::HealthProbe;
use crate::config::HealthConfig;
use crate::models::{ComponentHealth, ComponentKind, HealthSnapshot, HealthStatus};
use crate::resilience::CircuitState;
use crate::runtime::OrchestrationRuntime;
use crate::stage::{LivenessReport, Stage, StageRegistry};

#[derive(Debug)]
pub struct HealthChecker {
    config: HealthConfig,
    registry: Arc<StageRegistry>,
    runtime: Arc<OrchestrationRuntime>,
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl HealthChecker {
    pub fn new(
        config: HealthConfig,
        registry: Arc<StageRegistry>,
        runtime: Arc<OrchestrationRuntime>,
        probes: Vec<Arc<dyn HealthProbe>>,
    ) -> Self {
        Self {
            config,
            registry,
            runtime,
            probes,
        }
    }

    /// Run every probe and replace the cached snapshot
    #[instrument(skip(self), fields(components = self.registry.len() + self.probes.len()))]
    pub async fn probe(&self) -> Arc<HealthSnapshot> {
        let timeout = self.config.probe_timeout();

        let stage_checks = self
            .registry
            .stages()
            .map(|stage| self.check_stage(stage.clone(), timeout));
        let infra_checks = self
            .probes
            .iter()
            .map(|probe| check_infrastructure(probe.clone(), timeout));

        let (stages, infrastructure) = futures::join!(join_all(stage_checks), join_all(infra_checks));
        let snapshot = Arc::new(HealthSnapshot::new(
            stages.into_iter().chain(infrastructure).collect(),
        ));

        let previous = self.runtime.health_snapshot();
        if previous.overall != snapshot.overall {
            if snapshot.overall > previous.overall {
                warn!(
                    from = %previous.overall,
                    to = %snapshot.overall,
                    "🚨 HEALTH: System health deteriorated"
                );
            } else {
                info!(
                    from = %previous.overall,
                    to = %snapshot.overall,
                    "✅ HEALTH: System health improved"
                );
            }
        }

        self.runtime.store_health(snapshot.clone());
        snapshot
    }

    /// Cached snapshot, probing first when it is older than the staleness threshold
    pub async fn snapshot(&self) -> Arc<HealthSnapshot> {
        if self.runtime.health_is_stale(self.config.staleness_threshold()) {
            debug!("Health snapshot stale, probing");
            return self.probe().await;
        }
        self.runtime.health_snapshot()
    }

    async fn check_stage(&self, stage: Arc<dyn Stage>, timeout: Duration) -> ComponentHealth {
        let name = stage.name().to_string();
        let probe_stage = stage.clone();
        let mut component = timed_check(name, ComponentKind::Stage, true, timeout, async move {
            probe_stage
                .health_check()
                .await
                .map_err(|error| error.to_string())
        })
        .await;

        if let Some(breaker) = self.runtime.existing_breaker(stage.id()) {
            let breaker_status = match breaker.state() {
                CircuitState::Closed => HealthStatus::Healthy,
                CircuitState::HalfOpen => HealthStatus::Degraded,
                CircuitState::Open => HealthStatus::Unhealthy,
            };
            if breaker_status > component.status {
                component.status = breaker_status;
                component.message = Some(format!("circuit breaker {:?}", breaker.state()));
            }
        }
        if let Some(entry) = self.runtime.stage_status(stage.id()) {
            component.error_count = entry.total_failures;
        }
        component
    }
}

async fn check_infrastructure(probe: Arc<dyn HealthProbe>, timeout: Duration) -> ComponentHealth {
    let name = probe.name().to_string();
    let required = probe.required();
    timed_check(name, ComponentKind::Infrastructure, required, timeout, async move {
        probe.check().await.map_err(|error| error.to_string())
    })
    .await
}

async fn timed_check<F>(
    name: String,
    kind: ComponentKind,
    required: bool,
    timeout: Duration,
    check: F,
) -> ComponentHealth
where
    F: Future<Output = Result<LivenessReport, String>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, check).await;
    let response_time_ms = started.elapsed().as_millis() as u64;

    let (status, message, error_count) = match outcome {
        Ok(Ok(report)) => (report.status, report.message, 0),
        Ok(Err(error)) => {
            warn!(component = %name, error = %error, "Health probe failed");
            (HealthStatus::Unhealthy, Some(error), 1)
        }
        Err(_) => {
            warn!(component = %name, timeout_ms = timeout.as_millis() as u64, "Health probe timed out");
            (
                HealthStatus::Unhealthy,
                Some(format!("probe timed out after {}ms", timeout.as_millis())),
                1,
            )
        }
    };

    ComponentHealth {
        name,
        kind,
        required,
        status,
        last_checked_at: Utc::now(),
        response_time_ms,
        error_count,
        message,
    }
}
