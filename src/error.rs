//! # Error Types
//!
//! Error taxonomy for the orchestration core.
//!
//! Only [`OrchestratorError::Configuration`] ever escapes
//! [`Orchestrator::orchestrate`](crate::orchestration::Orchestrator::orchestrate).
//! Every other variant is recovered where it happens and recorded in the
//! aggregated result, so callers always get a structured outcome.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::stage::StageId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// A stage returned an error. Converted into a `failed` stage result.
    #[error("Stage {stage} execution failed: {reason}")]
    StageExecution { stage: StageId, reason: String },

    /// A required strong/critical dependency did not complete. Converted into `skipped`.
    #[error("Stage {stage} skipped: dependency {dependency} is {dependency_status}")]
    DependencyUnsatisfied {
        stage: StageId,
        dependency: StageId,
        dependency_status: String,
    },

    /// Per-stage or per-request deadline elapsed.
    #[error("Timeout after {elapsed:?}: {operation}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// Invalid request or configuration. Aborts before any stage runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A mandatory compliance control failed. Surfaced as a `blocked` verdict.
    #[error("Compliance blocked: {0}")]
    ComplianceBlocked(String),

    /// Circuit breaker short-circuited the call.
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Invalid alert transition from {from} to {to}")]
    InvalidAlertTransition { from: String, to: String },

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Another optimization change holds the global optimization lock.
    #[error("Optimization already in flight: {0}")]
    OptimizationInFlight(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Whether this error aborts a request before any stage runs.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::Configuration(_))
    }
}

impl From<ConfigurationError> for OrchestratorError {
    fn from(error: ConfigurationError) -> Self {
        OrchestratorError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::Internal(format!("JSON serialization error: {error}"))
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Errors returned by [`Stage::run`](crate::stage::Stage::run) implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// Temporary failure, eligible for retry with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Deterministic failure, retrying cannot help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The stage rejected its input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A downstream dependency of the stage is unavailable. Retryable.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
}

impl StageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient(_) | StageError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_errors_are_fatal() {
        assert!(OrchestratorError::Configuration("zero timeout".into()).is_fatal());
        assert!(!OrchestratorError::CircuitOpen("input_validation".into()).is_fatal());
        assert!(!OrchestratorError::Timeout {
            operation: "stage".into(),
            elapsed: Duration::from_millis(5),
        }
        .is_fatal());
    }

    #[test]
    fn test_stage_error_transience() {
        assert!(StageError::Transient("flaky".into()).is_transient());
        assert!(StageError::Unavailable("store".into()).is_transient());
        assert!(!StageError::Permanent("bad".into()).is_transient());
        assert!(!StageError::InvalidInput("empty".into()).is_transient());
    }

    #[test]
    fn test_configuration_error_conversion() {
        let error: OrchestratorError = ConfigurationError::InvalidValue {
            field: "health.probe_timeout_ms".into(),
            value: "0".into(),
            context: "must be greater than zero".into(),
        }
        .into();
        assert!(error.is_fatal());
        assert!(error.to_string().contains("probe_timeout_ms"));
    }
}
