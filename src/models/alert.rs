//! Alert model and its lifecycle.
//!
//! Alerts move monotonically `open -> acknowledged -> resolved` (an open alert
//! may also be resolved directly). Nothing leaves `resolved`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::metric::MetricKind;
use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Rolling metric crossed its configured threshold
    Threshold,
    /// Sample deviated from the metric's baseline
    Anomaly,
    /// Aggregate health left `healthy`
    Health,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Threshold => "threshold",
            AlertType::Anomaly => "anomaly",
            AlertType::Health => "health",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Open,
    Acknowledged,
    Resolved,
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertState::Open => "open",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        })
    }
}

/// Priority attached when an alert is handed to notification sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    Elevated,
    Urgent,
    Page,
}

impl NotificationPriority {
    pub fn for_severity(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Low | AlertSeverity::Medium => NotificationPriority::Normal,
            AlertSeverity::High => NotificationPriority::Elevated,
            AlertSeverity::Critical => NotificationPriority::Urgent,
        }
    }

    /// Next priority up, saturating at `Page`
    pub fn escalate(self) -> Self {
        match self {
            NotificationPriority::Normal => NotificationPriority::Elevated,
            NotificationPriority::Elevated => NotificationPriority::Urgent,
            NotificationPriority::Urgent | NotificationPriority::Page => NotificationPriority::Page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub source: String,
    pub metric: Option<MetricKind>,
    pub message: String,
    /// Observed value that raised the alert
    pub value: Option<f64>,
    /// Threshold or baseline the value was compared against
    pub reference: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
    pub priority: NotificationPriority,
    pub escalation_level: u8,
    pub last_escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            source: source.into(),
            metric: None,
            message: message.into(),
            value: None,
            reference: None,
            timestamp: Utc::now(),
            acknowledged: false,
            resolved: false,
            priority: NotificationPriority::for_severity(severity),
            escalation_level: 0,
            last_escalated_at: None,
            resolved_at: None,
        }
    }

    pub fn with_metric(mut self, metric: MetricKind, value: f64, reference: f64) -> Self {
        self.metric = Some(metric);
        self.value = Some(value);
        self.reference = Some(reference);
        self
    }

    pub fn state(&self) -> AlertState {
        if self.resolved {
            AlertState::Resolved
        } else if self.acknowledged {
            AlertState::Acknowledged
        } else {
            AlertState::Open
        }
    }

    pub fn is_active(&self) -> bool {
        !self.resolved
    }

    /// Key used to deduplicate alerts within the suppression window
    pub fn dedup_key(&self) -> String {
        let metric = self.metric.map(|m| m.as_str()).unwrap_or("none");
        format!("{}:{}:{}", self.alert_type.as_str(), metric, self.source)
    }

    pub fn acknowledge(&mut self) -> OrchestratorResult<()> {
        match self.state() {
            AlertState::Open => {
                self.acknowledged = true;
                Ok(())
            }
            from => Err(OrchestratorError::InvalidAlertTransition {
                from: from.to_string(),
                to: AlertState::Acknowledged.to_string(),
            }),
        }
    }

    pub fn resolve(&mut self) -> OrchestratorResult<()> {
        match self.state() {
            AlertState::Open | AlertState::Acknowledged => {
                self.resolved = true;
                self.resolved_at = Some(Utc::now());
                Ok(())
            }
            AlertState::Resolved => Err(OrchestratorError::InvalidAlertTransition {
                from: AlertState::Resolved.to_string(),
                to: AlertState::Resolved.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert::new(AlertType::Threshold, AlertSeverity::Critical, "orchestrator", "latency high")
            .with_metric(MetricKind::Latency, 9_000.0, 5_000.0)
    }

    #[test]
    fn test_lifecycle_is_monotonic() {
        let mut alert = alert();
        assert_eq!(alert.state(), AlertState::Open);

        alert.acknowledge().unwrap();
        assert_eq!(alert.state(), AlertState::Acknowledged);
        assert!(alert.acknowledge().is_err());

        alert.resolve().unwrap();
        assert_eq!(alert.state(), AlertState::Resolved);
        assert!(alert.acknowledge().is_err());
        assert!(alert.resolve().is_err());
        assert!(!alert.is_active());
    }

    #[test]
    fn test_open_alert_can_resolve_directly() {
        let mut alert = alert();
        alert.resolve().unwrap();
        assert_eq!(alert.state(), AlertState::Resolved);
        assert!(!alert.acknowledged);
    }

    #[test]
    fn test_priority_escalation_saturates() {
        assert_eq!(
            NotificationPriority::for_severity(AlertSeverity::Critical),
            NotificationPriority::Urgent
        );
        assert_eq!(NotificationPriority::Urgent.escalate(), NotificationPriority::Page);
        assert_eq!(NotificationPriority::Page.escalate(), NotificationPriority::Page);
    }

    #[test]
    fn test_dedup_key_includes_metric_and_source() {
        assert_eq!(alert().dedup_key(), "threshold:latency:orchestrator");
    }
}
