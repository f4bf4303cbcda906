//! # Alert Sinks
//!
//! Notification collaborators. The monitor guarantees an alert is produced
//! and queued; delivery (webhook, pager) is the sink's job. In-process sinks
//! receive alerts inline. Every other sink is called from a spawned task
//! under `monitor.sink_timeout_ms`, so a stalled endpoint never holds up a
//! request or a monitoring cycle.
//!
//! ```rust
//! use veracity_core::models::{Alert, AlertSeverity, AlertType};
//! use veracity_core::monitoring::{AlertSink, QueuedAlertSink};
//!
//! # tokio_test::block_on(async {
//! let queue = QueuedAlertSink::new(16);
//! let alert = Alert::new(AlertType::Health, AlertSeverity::High, "health", "vector store unhealthy");
//! queue.deliver(&alert).await.unwrap();
//!
//! let pending = queue.drain();
//! assert_eq!(pending.len(), 1);
//! # });
//! ```

use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

use crate::error::OrchestratorResult;
use crate::models::{Alert, AlertSeverity};

#[async_trait]
pub trait AlertSink: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether `deliver` completes without waiting on I/O
    fn is_in_process(&self) -> bool {
        false
    }

    async fn deliver(&self, alert: &Alert) -> OrchestratorResult<()>;
}

/// Writes every alert to the tracing pipeline
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    fn is_in_process(&self) -> bool {
        true
    }

    async fn deliver(&self, alert: &Alert) -> OrchestratorResult<()> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                alert_id = %alert.id,
                alert_type = alert.alert_type.as_str(),
                source = %alert.source,
                priority = ?alert.priority,
                escalation_level = alert.escalation_level,
                "🚨 ALERT: {}",
                alert.message
            ),
            AlertSeverity::High | AlertSeverity::Medium => warn!(
                alert_id = %alert.id,
                alert_type = alert.alert_type.as_str(),
                source = %alert.source,
                severity = %alert.severity,
                "⚠️ ALERT: {}",
                alert.message
            ),
            AlertSeverity::Low => info!(
                alert_id = %alert.id,
                alert_type = alert.alert_type.as_str(),
                source = %alert.source,
                "ALERT: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Bounded in-process queue for a downstream notifier to drain.
/// When full, the oldest queued alert is dropped.
#[derive(Debug)]
pub struct QueuedAlertSink {
    queue: ArrayQueue<Alert>,
    dropped: AtomicU64,
}

impl QueuedAlertSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn drain(&self) -> Vec<Alert> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AlertSink for QueuedAlertSink {
    fn name(&self) -> &str {
        "queue"
    }

    fn is_in_process(&self) -> bool {
        true
    }

    async fn deliver(&self, alert: &Alert) -> OrchestratorResult<()> {
        if let Some(evicted) = self.queue.force_push(alert.clone()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(evicted_alert = %evicted.id, "Alert queue full, dropped oldest alert");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertType;

    fn alert(message: &str) -> Alert {
        Alert::new(AlertType::Health, AlertSeverity::High, "health", message)
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_when_full() {
        let sink = QueuedAlertSink::new(2);
        for message in ["first", "second", "third"] {
            sink.deliver(&alert(message)).await.unwrap();
        }

        assert_eq!(sink.dropped(), 1);
        let drained: Vec<String> = sink.drain().into_iter().map(|a| a.message).collect();
        assert_eq!(drained, vec!["second".to_string(), "third".to_string()]);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_log_sink_accepts_all_severities() {
        let sink = LogAlertSink;
        for severity in [AlertSeverity::Low, AlertSeverity::High, AlertSeverity::Critical] {
            let alert = Alert::new(AlertType::Threshold, severity, "orchestrator", "check");
            assert!(sink.deliver(&alert).await.is_ok());
        }
    }
}
