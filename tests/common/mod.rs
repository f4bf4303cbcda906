//! Shared fixtures for integration tests

#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use veracity_core::config::OrchestratorConfig;
use veracity_core::models::{Dependency, DependencyStrength, OrchestrationRequest};
use veracity_core::orchestration::Orchestrator;
use veracity_core::stage::{Stage, StageId, StageRegistry};
use veracity_core::test_helpers::ScriptedStage;

/// Install a test subscriber once per binary; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn registry_of(stages: impl IntoIterator<Item = ScriptedStage>) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for stage in stages {
        registry
            .register(Arc::new(stage) as Arc<dyn Stage>)
            .expect("stage ids in fixtures are unique");
    }
    registry
}

/// Orchestrator over `stages` with the millisecond test configuration
pub fn orchestrator_with(stages: impl IntoIterator<Item = ScriptedStage>) -> Orchestrator {
    orchestrator_with_config(stages, OrchestratorConfig::for_test())
}

pub fn orchestrator_with_config(
    stages: impl IntoIterator<Item = ScriptedStage>,
    config: OrchestratorConfig,
) -> Orchestrator {
    init_test_logging();
    Orchestrator::builder()
        .config(config)
        .registry(registry_of(stages))
        .build()
        .expect("test configuration is valid")
}

pub fn request(stages: impl IntoIterator<Item = u16>) -> OrchestrationRequest {
    request_with_timeout(stages, Duration::from_secs(2))
}

pub fn request_with_timeout(
    stages: impl IntoIterator<Item = u16>,
    timeout: Duration,
) -> OrchestrationRequest {
    OrchestrationRequest::new(stages.into_iter().map(StageId), timeout)
        .with_payload(serde_json::json!({"message": "What year did the Berlin Wall fall?"}))
}

/// Required strong edge `dependent -> depends_on`
pub fn hard_edge(dependent: u16, depends_on: u16) -> Dependency {
    Dependency::new(
        StageId(dependent),
        [StageId(depends_on)],
        DependencyStrength::Strong,
        true,
    )
}
