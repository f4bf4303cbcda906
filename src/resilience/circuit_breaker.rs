//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker: Closed (normal operation), Open (failing
//! fast), and Half-Open (testing recovery). One breaker exists per stage.
//!
//! A breaker counts *logical invocations*: the coordinator wraps the whole
//! retry loop of a stage in [`CircuitBreaker::call`], so an invocation that
//! needed three attempts before failing counts as one failure.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerStageConfig;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not executed
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Point-in-time breaker counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls rejected while open
    pub rejected_count: u64,
    pub consecutive_failures: u64,
    pub half_open_successes: u64,
    pub failure_rate: f64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,
    state: AtomicU8,
    failure_threshold: u64,
    success_threshold: u64,
    cooldown: Duration,
    enabled: bool,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerStageConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            cooldown_ms = config.cooldown_ms,
            success_threshold = config.success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_threshold: u64::from(config.failure_threshold.max(1)),
            success_threshold: u64::from(config.success_threshold.max(1)),
            cooldown: config.cooldown(),
            enabled: true,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// A breaker that records metrics but never opens
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_threshold: u64::MAX,
            success_threshold: 1,
            cooldown: Duration::ZERO,
            enabled: false,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Whether a call may proceed; moves Open to HalfOpen once the cooldown elapsed
    pub fn try_acquire(&self) -> bool {
        if !self.enabled {
            return true;
        }

        let mut inner = self.inner.lock();
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    inner.metrics.rejected_count += 1;
                    debug!(component = %self.name, "Circuit open, rejecting call");
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.consecutive_failures = 0;

        if self.state() == CircuitState::HalfOpen {
            inner.metrics.half_open_successes += 1;
            if inner.metrics.half_open_successes >= self.success_threshold {
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.consecutive_failures += 1;

        match self.state() {
            CircuitState::Closed => {
                if inner.metrics.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // Any failure while testing recovery reopens immediately
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        if snapshot.total_calls > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / snapshot.total_calls as f64;
        }
        snapshot
    }

    /// Must be called with the inner lock held so state and timestamps move together
    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        self.state.store(to as u8, Ordering::Release);
        match to {
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.metrics.consecutive_failures = 0;
                inner.metrics.half_open_successes = 0;
                info!(component = %self.name, "🟢 Circuit breaker closed (recovered)");
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.metrics.half_open_successes = 0;
                warn!(
                    component = %self.name,
                    consecutive_failures = inner.metrics.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "🔴 Circuit breaker opened (failing fast)"
                );
            }
            CircuitState::HalfOpen => {
                inner.metrics.half_open_successes = 0;
                info!(component = %self.name, "🟡 Circuit breaker half-open (testing recovery)");
            }
        }
    }
}
