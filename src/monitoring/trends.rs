//! Performance trends derived from a metric's rolling window.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::models::MetricKind;

/// Relative change between window halves treated as noise
const STABLE_BAND: f64 = 0.05;
const MIN_TREND_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
    /// Not enough samples yet
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTrend {
    pub metric: MetricKind,
    pub trend: Trend,
    /// Mean of the rolling window
    pub current: Option<f64>,
    /// Exponentially weighted baseline mean
    pub baseline: Option<f64>,
    pub samples: usize,
}

/// Compare the mean of the newer half of `window` against the older half
pub fn classify(window: &VecDeque<f64>, higher_is_better: bool) -> Trend {
    if window.len() < MIN_TREND_SAMPLES {
        return Trend::Unknown;
    }
    let half = window.len() / 2;
    let older = window.iter().take(half).sum::<f64>() / half as f64;
    let newer_count = window.len() - half;
    let newer = window.iter().skip(half).sum::<f64>() / newer_count as f64;

    let change = if older.abs() > f64::EPSILON {
        (newer - older) / older.abs()
    } else {
        newer - older
    };
    if change.abs() < STABLE_BAND {
        return Trend::Stable;
    }
    if (change > 0.0) == higher_is_better {
        Trend::Improving
    } else {
        Trend::Degrading
    }
}
