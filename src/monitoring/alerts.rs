//! # Alert Store
//!
//! Process-wide alert list with suppression bookkeeping. Alerts are keyed by
//! id in a `DashMap`, so acknowledging one alert never contends with raising
//! another on a different shard.
//!
//! The store is bounded: resolved alerts are pruned once older than
//! `monitor.resolved_retention_ms`, and past `monitor.max_stored_alerts` the
//! oldest alerts are evicted, resolved before acknowledged before open.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{Alert, AlertSeverity, AlertState};

#[derive(Debug)]
pub struct AlertStore {
    alerts: DashMap<Uuid, Alert>,
    /// Last emission per dedup key
    last_raised: DashMap<String, DateTime<Utc>>,
    max_alerts: usize,
    resolved_retention: Duration,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl AlertStore {
    pub fn new(max_alerts: usize, resolved_retention: Duration) -> Self {
        Self {
            alerts: DashMap::new(),
            last_raised: DashMap::new(),
            max_alerts: max_alerts.max(1),
            resolved_retention,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.max_stored_alerts, config.resolved_retention())
    }

    /// Claim the right to raise an alert under `key`.
    ///
    /// Returns `false` when an alert with the same key was raised within
    /// `window`. The check and the update happen under one shard lock.
    pub fn try_claim(&self, key: &str, window: Duration, now: DateTime<Utc>) -> bool {
        let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::max_value());
        match self.last_raised.entry(key.to_string()) {
            Entry::Occupied(mut last) => {
                if now.signed_duration_since(*last.get()) < window {
                    debug!(key = %key, "Alert suppressed within dedup window");
                    return false;
                }
                last.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn insert(&self, alert: Alert) {
        self.alerts.insert(alert.id, alert);
        if self.alerts.len() > self.max_alerts {
            self.evict_overflow();
        }
    }

    /// Drop resolved alerts whose resolution is older than the retention.
    /// Returns how many were removed.
    pub fn prune_resolved(&self, now: DateTime<Utc>) -> usize {
        let retention =
            ChronoDuration::from_std(self.resolved_retention).unwrap_or_else(|_| ChronoDuration::max_value());
        let before = self.alerts.len();
        self.alerts.retain(|_, alert| match alert.resolved_at {
            Some(resolved_at) if alert.resolved => now.signed_duration_since(resolved_at) < retention,
            _ => true,
        });
        let pruned = before.saturating_sub(self.alerts.len());
        if pruned > 0 {
            debug!(pruned, "Pruned resolved alerts past retention");
        }
        pruned
    }

    fn evict_overflow(&self) {
        let mut candidates: Vec<(u8, DateTime<Utc>, Uuid)> = self
            .alerts
            .iter()
            .map(|alert| {
                let rank = match alert.state() {
                    AlertState::Resolved => 0,
                    AlertState::Acknowledged => 1,
                    AlertState::Open => 2,
                };
                (rank, alert.timestamp, alert.id)
            })
            .collect();
        let overflow = candidates.len().saturating_sub(self.max_alerts);
        if overflow == 0 {
            return;
        }
        candidates.sort();
        for (rank, _, id) in candidates.into_iter().take(overflow) {
            if rank > 0 {
                warn!(alert_id = %id, "Alert store full, evicting unresolved alert");
            }
            self.alerts.remove(&id);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.alerts.get(&id).map(|alert| alert.clone())
    }

    pub fn acknowledge(&self, id: Uuid) -> OrchestratorResult<Alert> {
        let mut alert = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::AlertNotFound(id.to_string()))?;
        alert.acknowledge()?;
        info!(alert_id = %id, severity = %alert.severity, "Alert acknowledged");
        Ok(alert.clone())
    }

    pub fn resolve(&self, id: Uuid) -> OrchestratorResult<Alert> {
        let mut alert = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::AlertNotFound(id.to_string()))?;
        alert.resolve()?;
        info!(alert_id = %id, severity = %alert.severity, "Alert resolved");
        Ok(alert.clone())
    }

    /// Unresolved alerts, newest first
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|alert| alert.is_active())
            .map(|alert| alert.clone())
            .collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        active
    }

    /// Escalate unacknowledged critical alerts whose last emission is older
    /// than `delay`, up to `max_level`. Returns the escalated alerts.
    pub fn escalate_due(&self, delay: Duration, max_level: u8, now: DateTime<Utc>) -> Vec<Alert> {
        let delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::max_value());
        let mut escalated = Vec::new();

        for mut alert in self.alerts.iter_mut() {
            if alert.severity != AlertSeverity::Critical
                || alert.state() != AlertState::Open
                || alert.escalation_level >= max_level
            {
                continue;
            }
            let last_emitted = alert.last_escalated_at.unwrap_or(alert.timestamp);
            if now.signed_duration_since(last_emitted) < delay {
                continue;
            }

            alert.priority = alert.priority.escalate();
            alert.escalation_level += 1;
            alert.last_escalated_at = Some(now);
            escalated.push(alert.clone());
        }
        escalated
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertType, MetricKind, NotificationPriority};

    fn critical() -> Alert {
        Alert::new(AlertType::Threshold, AlertSeverity::Critical, "orchestrator", "latency")
            .with_metric(MetricKind::Latency, 20_000.0, 5_000.0)
    }

    #[test]
    fn test_claim_suppresses_within_window() {
        let store = AlertStore::default();
        let now = Utc::now();
        let window = Duration::from_secs(60);

        assert!(store.try_claim("threshold:latency:orchestrator", window, now));
        assert!(!store.try_claim("threshold:latency:orchestrator", window, now));
        assert!(store.try_claim("threshold:quality:orchestrator", window, now));
        assert!(store.try_claim(
            "threshold:latency:orchestrator",
            window,
            now + ChronoDuration::seconds(61)
        ));
    }

    #[test]
    fn test_unknown_alert_is_an_error() {
        let store = AlertStore::default();
        assert!(matches!(
            store.acknowledge(Uuid::new_v4()),
            Err(OrchestratorError::AlertNotFound(_))
        ));
    }

    #[test]
    fn test_escalation_is_capped_and_skips_acknowledged() {
        let store = AlertStore::default();
        let open = critical();
        let acknowledged = critical();
        let open_id = open.id;
        let acknowledged_id = acknowledged.id;
        store.insert(open);
        store.insert(acknowledged);
        store.acknowledge(acknowledged_id).unwrap();

        let mut now = Utc::now() + ChronoDuration::seconds(10);
        let delay = Duration::from_secs(1);
        let mut rounds = 0;
        loop {
            let escalated = store.escalate_due(delay, 2, now);
            if escalated.is_empty() {
                break;
            }
            assert!(escalated.iter().all(|alert| alert.id == open_id));
            rounds += 1;
            now += ChronoDuration::seconds(10);
        }

        assert_eq!(rounds, 2);
        let alert = store.get(open_id).unwrap();
        assert_eq!(alert.escalation_level, 2);
        assert_eq!(alert.priority, NotificationPriority::Page);
        assert_eq!(store.get(acknowledged_id).unwrap().escalation_level, 0);
    }

    #[test]
    fn test_active_excludes_resolved() {
        let store = AlertStore::default();
        let alert = critical();
        let id = alert.id;
        store.insert(alert);
        store.insert(critical());
        store.resolve(id).unwrap();

        assert_eq!(store.active().len(), 1);
        assert_eq!(store.len(), 2);
    }

    fn alert_at(seconds_ago: i64) -> Alert {
        let mut alert = Alert::new(AlertType::Health, AlertSeverity::High, "health", "degraded");
        alert.timestamp = Utc::now() - ChronoDuration::seconds(seconds_ago);
        alert
    }

    #[test]
    fn test_store_never_exceeds_capacity_and_evicts_resolved_first() {
        let store = AlertStore::new(3, Duration::from_secs(3_600));
        let resolved = alert_at(1);
        let resolved_id = resolved.id;
        let oldest_open = alert_at(100);
        let oldest_open_id = oldest_open.id;
        store.insert(oldest_open);
        store.insert(resolved);
        store.resolve(resolved_id).unwrap();
        store.insert(alert_at(50));

        store.insert(alert_at(10));
        assert_eq!(store.len(), 3);
        assert!(store.get(resolved_id).is_none());
        assert!(store.get(oldest_open_id).is_some());

        store.insert(alert_at(5));
        assert_eq!(store.len(), 3);
        assert!(store.get(oldest_open_id).is_none());

        for _ in 0..100 {
            store.insert(alert_at(0));
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_resolved_alerts_pruned_after_retention() {
        let store = AlertStore::new(100, Duration::from_secs(60));
        let resolved = alert_at(0);
        let resolved_id = resolved.id;
        store.insert(resolved);
        store.insert(alert_at(0));
        store.resolve(resolved_id).unwrap();

        assert_eq!(store.prune_resolved(Utc::now()), 0);
        assert_eq!(store.prune_resolved(Utc::now() + ChronoDuration::seconds(61)), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(resolved_id).is_none());
    }
}
