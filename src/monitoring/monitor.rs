//! # Monitor
//!
//! Consumes aggregated outcomes and health snapshots, keeps a rolling window
//! and an EWMA baseline per tracked metric, and raises three kinds of alert:
//!
//! - **threshold**: the rolling value is past its configured threshold.
//!   Severity grows with the relative excess (<10% low, <25% medium,
//!   <50% high, otherwise critical).
//! - **anomaly**: a single sample deviates from the metric's baseline by
//!   more than `std_dev_threshold` baseline standard deviations.
//! - **health**: the aggregate health status is not `healthy`.
//!
//! Every alert passes the suppression window keyed by (type, metric, source)
//! before it is stored and handed to the sinks. Each metric has its own
//! `DashMap` entry, so a request observation never blocks a health tick
//! updating a different metric.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::baseline::EwmaBaseline;
use super::sink::AlertSink;
use super::trends::{self, PerformanceTrend};
use crate::config::{MetricThresholds, MonitorConfig};
use crate::constants::sources;
use crate::models::{
    AggregateOutcome, Alert, AlertSeverity, AlertType, HealthSnapshot, HealthStatus, MetricKind,
};
use crate::runtime::OrchestrationRuntime;

#[derive(Debug)]
struct MetricState {
    window: VecDeque<f64>,
    baseline: EwmaBaseline,
    /// Samples observed since the monitor started
    total_samples: u64,
}

impl MetricState {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.rolling_window),
            baseline: EwmaBaseline::new(&config.anomaly),
            total_samples: 0,
        }
    }

    fn rolling_value(&self) -> Option<f64> {
        mean(self.window.iter().copied(), self.window.len())
    }
}

#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    runtime: Arc<OrchestrationRuntime>,
    metrics: DashMap<MetricKind, MetricState>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl Monitor {
    pub fn new(runtime: Arc<OrchestrationRuntime>) -> Self {
        Self {
            config: runtime.config().monitor.clone(),
            runtime,
            metrics: DashMap::new(),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().push(sink);
    }

    /// Observe one completed request. Returns the alerts raised by it.
    /// Availability is sampled on health ticks only.
    pub async fn observe(&self, outcome: &AggregateOutcome) -> Vec<Alert> {
        let mut samples = vec![
            (MetricKind::Latency, outcome.total_duration_ms as f64),
            (MetricKind::ErrorRate, outcome.error_rate()),
        ];
        if let Some(score) = outcome.blended_score {
            samples.push((MetricKind::Quality, score));
        }

        let mut candidates = Vec::new();
        for (metric, value) in samples {
            candidates.extend(self.record_sample(metric, value, sources::ORCHESTRATOR));
        }
        self.raise(candidates).await
    }

    /// Observe one health-probe tick
    pub async fn observe_health(&self, health: &HealthSnapshot) -> Vec<Alert> {
        let mut candidates = self.record_sample(MetricKind::Availability, health.availability(), sources::HEALTH);
        candidates.extend(health_alert(health));
        self.raise(candidates).await
    }

    /// Re-emit overdue unacknowledged critical alerts at a higher priority
    /// Also prunes resolved alerts past their retention.
    pub async fn escalate(&self) -> Vec<Alert> {
        let now = Utc::now();
        self.runtime.alerts().prune_resolved(now);
        let escalated = self.runtime.alerts().escalate_due(
            self.config.escalation_delay(),
            self.config.max_escalation_level,
            now,
        );
        for alert in &escalated {
            warn!(
                alert_id = %alert.id,
                escalation_level = alert.escalation_level,
                priority = ?alert.priority,
                "🚨 ESCALATION: unacknowledged critical alert re-emitted"
            );
            self.deliver(alert).await;
        }
        escalated
    }

    /// Mean of the metric's rolling window
    pub fn rolling_value(&self, metric: MetricKind) -> Option<f64> {
        self.metrics.get(&metric).and_then(|state| state.rolling_value())
    }

    /// Count of samples observed for `metric` so far. Pass it back to
    /// [`Monitor::mean_since`] to average only later samples.
    pub fn sample_mark(&self, metric: MetricKind) -> u64 {
        self.metrics.get(&metric).map_or(0, |state| state.total_samples)
    }

    /// Mean of the samples observed after `mark`, limited to the rolling window
    pub fn mean_since(&self, metric: MetricKind, mark: u64) -> Option<f64> {
        let state = self.metrics.get(&metric)?;
        let fresh = state.total_samples.saturating_sub(mark) as usize;
        let count = fresh.min(state.window.len());
        mean(state.window.iter().rev().take(count).copied(), count)
    }

    pub fn trends(&self) -> Vec<PerformanceTrend> {
        MetricKind::ALL
            .iter()
            .map(|metric| match self.metrics.get(metric) {
                Some(state) => PerformanceTrend {
                    metric: *metric,
                    trend: trends::classify(&state.window, metric.higher_is_better()),
                    current: state.rolling_value(),
                    baseline: (state.baseline.samples() > 0).then(|| state.baseline.mean()),
                    samples: state.window.len(),
                },
                None => PerformanceTrend {
                    metric: *metric,
                    trend: trends::Trend::Unknown,
                    current: None,
                    baseline: None,
                    samples: 0,
                },
            })
            .collect()
    }

    /// Fold a sample into the metric state and return candidate alerts.
    /// The shard guard is released before anything is awaited.
    fn record_sample(&self, metric: MetricKind, value: f64, source: &str) -> Vec<Alert> {
        if !value.is_finite() {
            debug!(metric = %metric, "Ignoring non-finite sample");
            return Vec::new();
        }
        let mut state = self
            .metrics
            .entry(metric)
            .or_insert_with(|| MetricState::new(&self.config));

        if state.window.len() >= self.config.rolling_window {
            state.window.pop_front();
        }
        state.window.push_back(value);
        state.total_samples += 1;
        let z_score = state.baseline.observe(value);
        let baseline_mean = state.baseline.mean();
        let rolling = state.rolling_value();
        drop(state);

        let mut alerts = Vec::new();
        if let Some(rolling) = rolling {
            let threshold = threshold_for(&self.config.thresholds, metric);
            if let Some(excess) = relative_excess(metric, rolling, threshold) {
                let severity = threshold_severity(excess);
                alerts.push(
                    Alert::new(
                        AlertType::Threshold,
                        severity,
                        source,
                        format!(
                            "{metric} rolling value {rolling:.3} past threshold {threshold:.3} ({:.0}% excess)",
                            excess * 100.0
                        ),
                    )
                    .with_metric(metric, rolling, threshold),
                );
            }
        }

        let limit = self.config.anomaly.std_dev_threshold;
        if let Some(z) = z_score.filter(|z| *z > limit) {
            let severity = if z > limit * 2.0 {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            alerts.push(
                Alert::new(
                    AlertType::Anomaly,
                    severity,
                    source,
                    format!("{metric} sample {value:.3} is {z:.1} standard deviations from baseline {baseline_mean:.3}"),
                )
                .with_metric(metric, value, baseline_mean),
            );
        }
        alerts
    }

    /// Deduplicate, store and dispatch candidate alerts
    async fn raise(&self, candidates: Vec<Alert>) -> Vec<Alert> {
        let window = self.config.suppression_window();
        let now = Utc::now();
        let raised: Vec<Alert> = candidates
            .into_iter()
            .filter(|alert| self.runtime.alerts().try_claim(&alert.dedup_key(), window, now))
            .collect();

        for alert in &raised {
            self.runtime.alerts().insert(alert.clone());
            self.deliver(alert).await;
        }
        raised
    }

    async fn deliver(&self, alert: &Alert) {
        let (local, external): (Vec<_>, Vec<_>) = self
            .sinks
            .read()
            .iter()
            .cloned()
            .partition(|sink| sink.is_in_process());

        for sink in local {
            if let Err(error) = sink.deliver(alert).await {
                warn!(sink = sink.name(), alert_id = %alert.id, error = %error, "Alert sink delivery failed");
            }
        }
        if external.is_empty() {
            return;
        }

        let alert = alert.clone();
        let deadline = self.config.sink_timeout();
        tokio::spawn(async move {
            for sink in external {
                match tokio::time::timeout(deadline, sink.deliver(&alert)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        warn!(sink = sink.name(), alert_id = %alert.id, error = %error, "Alert sink delivery failed")
                    }
                    Err(_) => warn!(
                        sink = sink.name(),
                        alert_id = %alert.id,
                        timeout_ms = deadline.as_millis() as u64,
                        "Alert sink delivery timed out"
                    ),
                }
            }
        });
    }
}

fn health_alert(health: &HealthSnapshot) -> Option<Alert> {
    let severity = match health.overall {
        HealthStatus::Healthy => return None,
        HealthStatus::Degraded => AlertSeverity::Medium,
        HealthStatus::Unhealthy => AlertSeverity::High,
        HealthStatus::Critical => AlertSeverity::Critical,
    };
    let failing: Vec<&str> = health
        .components
        .values()
        .filter(|component| component.status != HealthStatus::Healthy)
        .map(|component| component.name.as_str())
        .collect();
    Some(Alert::new(
        AlertType::Health,
        severity,
        sources::HEALTH,
        format!("system health is {} ({})", health.overall, failing.join(", ")),
    ))
}

fn threshold_for(thresholds: &MetricThresholds, metric: MetricKind) -> f64 {
    match metric {
        MetricKind::Latency => thresholds.latency_ms,
        MetricKind::ErrorRate => thresholds.error_rate,
        MetricKind::Availability => thresholds.availability,
        MetricKind::Quality => thresholds.quality,
    }
}

/// How far past its threshold `value` is, relative to the threshold.
/// `None` while the value is on the good side.
fn relative_excess(metric: MetricKind, value: f64, threshold: f64) -> Option<f64> {
    let past = if metric.higher_is_better() {
        threshold - value
    } else {
        value - threshold
    };
    if past <= 0.0 {
        return None;
    }
    if threshold.abs() > f64::EPSILON {
        Some(past / threshold.abs())
    } else {
        Some(past)
    }
}

fn threshold_severity(excess: f64) -> AlertSeverity {
    if excess < 0.10 {
        AlertSeverity::Low
    } else if excess < 0.25 {
        AlertSeverity::Medium
    } else if excess < 0.50 {
        AlertSeverity::High
    } else {
        AlertSeverity::Critical
    }
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> Option<f64> {
    (count > 0).then(|| values.sum::<f64>() / count as f64)
}
