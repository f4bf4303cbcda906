//! # Test Helpers
//!
//! Deterministic doubles shared by unit and integration tests. Compiled for
//! unit tests and behind the `test-utils` feature, never into a default build.
//!
//! - [`ScriptedStage`]: a stage whose outcome, delay and failure pattern
//!   are scripted up front, with a call counter for breaker assertions.
//! - [`StaticProbe`]: an infrastructure probe reporting a fixed status.
//! - [`empty_result`]: a minimal terminal result for history and store tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{OrchestratorResult, StageError};
use crate::health::HealthProbe;
use crate::models::{
    ComplianceReport, Dependency, HealthStatus, OrchestrationResult, OverallStatus,
    RequestPriority, ResourceUsage, RiskEstimate, RiskLevel,
};
use crate::stage::{
    LivenessReport, QualityReport, Stage, StageContext, StageId, StageInput, StageOutput,
};

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(StageError),
    Panic,
}

/// Stage double. Output is always `{"stage": <name>}` plus any extra fields.
#[derive(Debug, Clone)]
pub struct ScriptedStage {
    id: StageId,
    name: String,
    quality: f64,
    behavior: Behavior,
    /// Errors returned by the first N calls before `behavior` applies
    fail_first: Option<(u32, StageError)>,
    delay: Option<Duration>,
    dependencies: Vec<Dependency>,
    cacheable: bool,
    cost_units: f64,
    extra_output: BTreeMap<String, Value>,
    liveness: HealthStatus,
    calls: Arc<AtomicU32>,
}

impl ScriptedStage {
    fn new(id: u16, name: &str, quality: f64, behavior: Behavior) -> Self {
        Self {
            id: StageId(id),
            name: name.to_string(),
            quality,
            behavior,
            fail_first: None,
            delay: None,
            dependencies: Vec::new(),
            cacheable: false,
            cost_units: 0.0,
            extra_output: BTreeMap::new(),
            liveness: HealthStatus::Healthy,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn succeeding(id: u16, name: &str, quality: f64) -> Self {
        Self::new(id, name, quality, Behavior::Succeed)
    }

    pub fn failing(id: u16, name: &str, error: StageError) -> Self {
        Self::new(id, name, 0.0, Behavior::Fail(error))
    }

    pub fn panicking(id: u16, name: &str) -> Self {
        Self::new(id, name, 0.0, Behavior::Panic)
    }

    pub fn failing_first(mut self, calls: u32, error: StageError) -> Self {
        self.fail_first = Some((calls, error));
        self
    }

    /// Sleep before every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    pub fn with_cost(mut self, cost_units: f64) -> Self {
        self.cost_units = cost_units;
        self
    }

    pub fn with_output_field(mut self, key: &str, value: Value) -> Self {
        self.extra_output.insert(key.to_string(), value);
        self
    }

    pub fn with_liveness(mut self, status: HealthStatus) -> Self {
        self.liveness = status;
        self
    }

    /// Shared counter of `run` invocations
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    async fn run(&self, _ctx: &StageContext, _input: &StageInput) -> Result<StageOutput, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((failures, error)) = &self.fail_first {
            if call <= *failures {
                return Err(error.clone());
            }
        }
        match &self.behavior {
            Behavior::Succeed => {
                let mut output = json!({ "stage": self.name });
                if let Value::Object(fields) = &mut output {
                    fields.extend(self.extra_output.clone());
                }
                let report = QualityReport::new(self.quality, self.quality).with_resource_usage(ResourceUsage {
                    cost_units: self.cost_units,
                    ..ResourceUsage::default()
                });
                Ok(StageOutput::new(output, report))
            }
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Panic => panic!("scripted panic in {}", self.name),
        }
    }

    async fn health_check(&self) -> Result<LivenessReport, StageError> {
        Ok(LivenessReport {
            status: self.liveness,
            message: None,
        })
    }
}

/// Infrastructure probe with a fixed answer
#[derive(Debug, Clone)]
pub struct StaticProbe {
    name: String,
    status: HealthStatus,
    required: bool,
    delay: Option<Duration>,
}

impl StaticProbe {
    pub fn healthy(name: &str) -> Self {
        Self::with_status(name, HealthStatus::Healthy)
    }

    pub fn with_status(name: &str, status: HealthStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            required: true,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn check(&self) -> OrchestratorResult<LivenessReport> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(LivenessReport {
            status: self.status,
            message: None,
        })
    }
}

/// Successful result with no stages
pub fn empty_result(request_id: Uuid) -> OrchestrationResult {
    let now = Utc::now();
    OrchestrationResult {
        request_id,
        priority: RequestPriority::Normal,
        status: OverallStatus::Success,
        blended_score: None,
        risk: RiskEstimate {
            hallucination_probability: None,
            level: RiskLevel::Unknown,
            model: "inverse_quality_placeholder".to_string(),
        },
        stage_results: Vec::new(),
        alerts: Vec::new(),
        proposals: Vec::new(),
        compliance: ComplianceReport::pass(),
        timings: BTreeMap::new(),
        output: Some(json!({})),
        aborted: false,
        started_at: now,
        completed_at: now,
        total_duration_ms: 0,
    }
}
