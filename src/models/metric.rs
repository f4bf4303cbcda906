//! Tracked metrics.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Request latency in milliseconds
    Latency,
    /// Fraction of executed stages that failed or timed out
    ErrorRate,
    /// Fraction of components that are available
    Availability,
    /// Blended quality score
    Quality,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Latency,
        MetricKind::ErrorRate,
        MetricKind::Availability,
        MetricKind::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Latency => "latency",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::Availability => "availability",
            MetricKind::Quality => "quality",
        }
    }

    /// Whether larger values are better for this metric
    pub fn higher_is_better(&self) -> bool {
        matches!(self, MetricKind::Availability | MetricKind::Quality)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
