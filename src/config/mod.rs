//! # Orchestrator Configuration
//!
//! Layered configuration for the orchestration core. Every section has
//! complete defaults so an empty file (or no file at all) yields a working
//! configuration; TOML files and `VERACITY__SECTION__KEY` environment
//! variables override individual fields.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use veracity_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let probe_interval = manager.config().health.probe_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/veracity.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub coordinator: CoordinatorConfig,
    pub circuit_breakers: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub monitor: MonitorConfig,
    pub optimizer: OptimizerConfig,
    pub history: HistoryConfig,
}

impl OrchestratorConfig {
    /// Test-friendly configuration with millisecond-scale timings.
    pub fn for_test() -> Self {
        Self {
            coordinator: CoordinatorConfig {
                max_concurrent_stages: 16,
                wave_concurrency: 4,
                retry: RetryConfig {
                    max_attempts: 2,
                    base_delay_ms: 1,
                    max_delay_ms: 10,
                    multiplier: 2.0,
                },
                caching_enabled: false,
                stage_cache_ttl_ms: 1_000,
                stage_cache_capacity: 64,
                validation_strictness: 0.5,
            },
            circuit_breakers: CircuitBreakerConfig {
                cooldown_ms: 200,
                ..CircuitBreakerConfig::default()
            },
            health: HealthConfig {
                probe_interval_ms: 50,
                probe_timeout_ms: 50,
                staleness_threshold_ms: 5_000,
            },
            monitor: MonitorConfig {
                escalation_delay_ms: 50,
                suppression_window_ms: 60_000,
                sink_timeout_ms: 100,
                ..MonitorConfig::default()
            },
            optimizer: OptimizerConfig {
                observation_window_ms: 20,
                apply_lock_timeout_ms: 50,
                ..OptimizerConfig::default()
            },
            history: HistoryConfig {
                persistence_write_timeout_ms: 100,
                ..HistoryConfig::default()
            },
        }
    }

    /// Validate cross-field constraints. Called by the loader after merging.
    pub fn validate(&self) -> ConfigResult<()> {
        let c = &self.coordinator;
        if c.max_concurrent_stages == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordinator.max_concurrent_stages",
                c.max_concurrent_stages,
                "must be greater than zero",
            ));
        }
        if c.wave_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordinator.wave_concurrency",
                c.wave_concurrency,
                "must be greater than zero",
            ));
        }
        if c.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "coordinator.retry.multiplier",
                c.retry.multiplier,
                "must be >= 1.0",
            ));
        }
        if self.circuit_breakers.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breakers.failure_threshold",
                0,
                "must be greater than zero",
            ));
        }
        for (field, value) in [
            ("health.probe_interval_ms", self.health.probe_interval_ms),
            ("health.probe_timeout_ms", self.health.probe_timeout_ms),
            ("optimizer.apply_lock_timeout_ms", self.optimizer.apply_lock_timeout_ms),
            ("monitor.sink_timeout_ms", self.monitor.sink_timeout_ms),
            ("history.persistence_write_timeout_ms", self.history.persistence_write_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than zero",
                ));
            }
        }
        let m = &self.monitor;
        if m.rolling_window == 0 {
            return Err(ConfigurationError::invalid_value(
                "monitor.rolling_window",
                m.rolling_window,
                "must be greater than zero",
            ));
        }
        if !(m.anomaly.alpha > 0.0 && m.anomaly.alpha <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "monitor.anomaly.alpha",
                m.anomaly.alpha,
                "must be in (0, 1]",
            ));
        }
        if m.anomaly.std_dev_threshold <= 0.0 {
            return Err(ConfigurationError::invalid_value(
                "monitor.anomaly.std_dev_threshold",
                m.anomaly.std_dev_threshold,
                "must be positive",
            ));
        }
        for (field, value) in [
            ("coordinator.validation_strictness", c.validation_strictness),
            ("monitor.thresholds.error_rate", m.thresholds.error_rate),
            ("monitor.thresholds.availability", m.thresholds.availability),
            ("monitor.thresholds.quality", m.thresholds.quality),
            ("optimizer.max_strictness", self.optimizer.max_strictness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::invalid_value(field, value, "must be in [0, 1]"));
            }
        }
        if m.max_stored_alerts == 0 {
            return Err(ConfigurationError::invalid_value(
                "monitor.max_stored_alerts",
                0,
                "must be greater than zero",
            ));
        }
        if c.stage_cache_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordinator.stage_cache_capacity",
                0,
                "must be greater than zero",
            ));
        }
        if self.history.capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "history.capacity",
                0,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Stage execution settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Process-wide cap on concurrently executing stages
    pub max_concurrent_stages: usize,
    /// Initial per-wave concurrency; the optimizer may lower it at runtime
    pub wave_concurrency: usize,
    pub retry: RetryConfig,
    /// Initial value of the caching tunable
    pub caching_enabled: bool,
    /// TTL of cached outputs for cacheable stages
    pub stage_cache_ttl_ms: u64,
    /// Cached outputs kept before the oldest is evicted
    pub stage_cache_capacity: usize,
    /// Initial validation strictness handed to stages, in [0, 1]
    pub validation_strictness: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 64,
            wave_concurrency: 8,
            retry: RetryConfig::default(),
            caching_enabled: false,
            stage_cache_ttl_ms: 300_000,
            stage_cache_capacity: 4_096,
            validation_strictness: 0.5,
        }
    }
}

impl CoordinatorConfig {
    pub fn stage_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.stage_cache_ttl_ms)
    }
}

/// Retry policy for transient stage failures
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Per-stage circuit breaker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failed invocations that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a trial call
    pub cooldown_ms: u64,
    /// Successful trial calls required to close a half-open circuit
    pub success_threshold: u32,
    /// Overrides keyed by stage name
    pub stage_overrides: HashMap<String, CircuitBreakerStageConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_ms: 30_000,
            success_threshold: 1,
            stage_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerStageConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Resolve the effective breaker settings for a stage
    pub fn for_stage(&self, stage_name: &str) -> CircuitBreakerStageConfig {
        self.stage_overrides
            .get(stage_name)
            .cloned()
            .unwrap_or(CircuitBreakerStageConfig {
                failure_threshold: self.failure_threshold,
                cooldown_ms: self.cooldown_ms,
                success_threshold: self.success_threshold,
            })
    }
}

impl CircuitBreakerStageConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Health probing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
    /// Deadline for each individual liveness probe
    pub probe_timeout_ms: u64,
    /// Cached snapshots older than this are refreshed before a run
    pub staleness_threshold_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 30_000,
            probe_timeout_ms: 2_000,
            staleness_threshold_ms: 60_000,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }
}

/// Monitoring, alerting and anomaly detection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples kept per metric for rolling values and trends
    pub rolling_window: usize,
    pub thresholds: MetricThresholds,
    /// Duplicate alerts for the same (metric, source) are suppressed within this window
    pub suppression_window_ms: u64,
    /// Unacknowledged critical alerts older than this are escalated
    pub escalation_delay_ms: u64,
    pub max_escalation_level: u8,
    pub anomaly: AnomalyConfig,
    /// Capacity of the in-process notification queue
    pub alert_queue_capacity: usize,
    /// Deadline for one delivery to an external sink
    pub sink_timeout_ms: u64,
    /// Alerts kept in the alert store; resolved alerts are evicted first
    pub max_stored_alerts: usize,
    /// Resolved alerts older than this are pruned from the alert store
    pub resolved_retention_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rolling_window: 50,
            thresholds: MetricThresholds::default(),
            suppression_window_ms: 300_000,
            escalation_delay_ms: 900_000,
            max_escalation_level: 3,
            anomaly: AnomalyConfig::default(),
            alert_queue_capacity: 1_024,
            sink_timeout_ms: 5_000,
            max_stored_alerts: 10_000,
            resolved_retention_ms: 3_600_000,
        }
    }
}

impl MonitorConfig {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn resolved_retention(&self) -> Duration {
        Duration::from_millis(self.resolved_retention_ms)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }

    pub fn escalation_delay(&self) -> Duration {
        Duration::from_millis(self.escalation_delay_ms)
    }
}

/// Threshold per tracked metric. Latency and error rate are upper bounds,
/// availability and quality are lower bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricThresholds {
    pub latency_ms: f64,
    pub error_rate: f64,
    pub availability: f64,
    pub quality: f64,
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 5_000.0,
            error_rate: 0.1,
            availability: 0.95,
            quality: 0.6,
        }
    }
}

/// Exponentially weighted baseline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Smoothing factor applied to each new sample
    pub alpha: f64,
    /// Deviations beyond this many baseline standard deviations are anomalous
    pub std_dev_threshold: f64,
    /// Samples required before the baseline is trusted
    pub warmup_samples: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            std_dev_threshold: 3.0,
            warmup_samples: 10,
        }
    }
}

/// Optimization feedback loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    /// Apply and validate the best proposal in the background after each request
    pub auto_apply: bool,
    /// Proposals with a smaller estimated relative benefit are discarded
    pub min_improvement: f64,
    /// Proposals with a larger estimated resource cost are discarded
    pub resource_budget: f64,
    pub observation_window_ms: u64,
    /// Relative regression of the target metric that triggers rollback
    pub rollback_tolerance: f64,
    pub apply_lock_timeout_ms: u64,
    pub latency_target_ms: f64,
    pub quality_target: f64,
    pub strictness_step: f64,
    pub max_strictness: f64,
    pub max_retry_attempts: u32,
    pub min_wave_concurrency: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_apply: false,
            min_improvement: 0.05,
            resource_budget: 1.0,
            observation_window_ms: 60_000,
            rollback_tolerance: 0.05,
            apply_lock_timeout_ms: 5_000,
            latency_target_ms: 2_000.0,
            quality_target: 0.75,
            strictness_step: 0.1,
            max_strictness: 0.9,
            max_retry_attempts: 5,
            min_wave_concurrency: 1,
        }
    }
}

impl OptimizerConfig {
    pub fn observation_window(&self) -> Duration {
        Duration::from_millis(self.observation_window_ms)
    }

    pub fn apply_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_lock_timeout_ms)
    }
}

/// Result history settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// In-memory ring buffer capacity
    pub capacity: usize,
    /// Attempts per persistence write before giving up
    pub persistence_write_attempts: u32,
    /// Deadline for a single persistence write attempt
    pub persistence_write_timeout_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            persistence_write_attempts: 3,
            persistence_write_timeout_ms: 2_000,
        }
    }
}

impl HistoryConfig {
    pub fn persistence_write_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_write_timeout_ms)
    }
}
