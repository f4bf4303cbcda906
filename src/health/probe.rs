//! Liveness probes for infrastructure dependencies.

use async_trait::async_trait;
use std::fmt;

use crate::error::OrchestratorResult;
use crate::stage::LivenessReport;

/// A dependency the pipeline relies on outside the stages themselves
/// (result store, cache, queue).
#[async_trait]
pub trait HealthProbe: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Required components drive the aggregate status; optional ones cap at `degraded`
    fn required(&self) -> bool {
        true
    }

    async fn check(&self) -> OrchestratorResult<LivenessReport>;
}
