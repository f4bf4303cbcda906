//! Health snapshot model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Component health, ordered by severity: `Critical > Unhealthy > Degraded > Healthy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        }
    }

    /// Healthy or degraded
    pub fn is_available(&self) -> bool {
        *self <= HealthStatus::Degraded
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Stage,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub kind: ComponentKind,
    /// Optional components degrade the aggregate at most to `degraded`
    pub required: bool,
    pub status: HealthStatus,
    pub last_checked_at: DateTime<Utc>,
    pub response_time_ms: u64,
    pub error_count: u64,
    pub message: Option<String>,
}

/// Point-in-time health of every component plus the aggregate status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub overall: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub captured_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn new(components: Vec<ComponentHealth>) -> Self {
        let overall = Self::aggregate(&components);
        Self {
            overall,
            components: components
                .into_iter()
                .map(|component| (component.name.clone(), component))
                .collect(),
            captured_at: Utc::now(),
        }
    }

    /// Snapshot used before the first probe has run
    pub fn initial() -> Self {
        Self::new(Vec::new())
    }

    /// Worst status among required components; optional components cap at `degraded`
    pub fn aggregate(components: &[ComponentHealth]) -> HealthStatus {
        components
            .iter()
            .map(|component| {
                if component.required {
                    component.status
                } else {
                    component.status.min(HealthStatus::Degraded)
                }
            })
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Fraction of components that are healthy or degraded; 1.0 when empty
    pub fn availability(&self) -> f64 {
        if self.components.is_empty() {
            return 1.0;
        }
        let available = self
            .components
            .values()
            .filter(|component| component.status.is_available())
            .count();
        available as f64 / self.components.len() as f64
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }
}
