//! # Resilience Module
//!
//! Fault isolation for stage execution: per-stage circuit breakers and the
//! exponential backoff policy used for transient-failure retries.
//!
//! ## Usage
//!
//! ```rust
//! use veracity_core::config::CircuitBreakerStageConfig;
//! use veracity_core::resilience::{CircuitBreaker, CircuitState};
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     "response_validation",
//!     &CircuitBreakerStageConfig { failure_threshold: 5, cooldown_ms: 30_000, success_threshold: 1 },
//! );
//!
//! let result = breaker.call(|| async { Ok::<_, String>("validated") }).await;
//! assert!(result.is_ok());
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState};
