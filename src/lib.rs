#![allow(clippy::doc_markdown)] // Allow technical terms like EWMA in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Veracity Core
//!
//! Orchestration and monitoring core for a layered hallucination-prevention
//! pipeline.
//!
//! ## Overview
//!
//! A request names the pipeline stages it wants (input validation, context
//! assembly, response validation, feedback learning, plus auxiliary stages).
//! The core orders them by their declared dependencies, runs independent
//! stages concurrently, and merges their results into one quality and risk
//! verdict, while tracking component health, raising alerts and tuning its
//! own runtime settings.
//!
//! ## Architecture
//!
//! Data flows one way per request:
//!
//! ```text
//! Request -> Coordinator (waves of Stages) -> Aggregator
//!         -> ComplianceGate / Monitor / Optimizer -> OrchestrationResult
//! ```
//!
//! All process-wide mutable state (stage status, circuit breakers, health
//! cache, alerts, tunables, history) lives in one [`OrchestrationRuntime`]
//! per orchestrator instance, locked per key.
//!
//! ## Module Organization
//!
//! - [`stage`] - Stage contract, registry and default stages
//! - [`orchestration`] - Planner, coordinator, aggregator, compliance gate and facade
//! - [`health`] - Health probing and aggregation
//! - [`monitoring`] - Rolling metrics, anomaly baselines, alerts and sinks
//! - [`optimization`] - Proposals and validate-then-rollback tuning
//! - [`resilience`] - Circuit breakers and backoff
//! - [`persistence`] - Audit storage for results and alerts
//! - [`config`] - Layered configuration
//! - [`error`] - Error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use veracity_core::config::ConfigManager;
//! use veracity_core::models::OrchestrationRequest;
//! use veracity_core::orchestration::Orchestrator;
//! use veracity_core::stage::StageId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! veracity_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?.config().clone();
//! let orchestrator = Orchestrator::with_default_stages(config)?;
//!
//! let request = OrchestrationRequest::new(
//!     [StageId::INPUT_VALIDATION, StageId::CONTEXT_ASSEMBLY],
//!     Duration::from_secs(2),
//! )
//! .with_payload(serde_json::json!({"message": "Summarize the release notes"}));
//!
//! let result = orchestrator.orchestrate(request).await?;
//! println!("status={} score={:?}", result.status, result.blended_score);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod monitoring;
pub mod optimization;
pub mod orchestration;
pub mod persistence;
pub mod resilience;
pub mod runtime;
pub mod stage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult, StageError};
pub use models::{
    Alert, HealthSnapshot, HealthStatus, OrchestrationRequest, OrchestrationResult, OverallStatus,
    StageResult, StageStatus,
};
pub use orchestration::Orchestrator;
pub use runtime::OrchestrationRuntime;
pub use stage::{Stage, StageId, StageRegistry};
