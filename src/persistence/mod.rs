//! # Result Persistence
//!
//! Append-only audit storage for orchestration results and alerts. The
//! orchestrator only depends on [`ResultStore`]; a document or key-value
//! backend plugs in behind it. Writes are at-least-once: the orchestrator
//! retries failed appends, so implementations must tolerate duplicates of
//! the same id. Each append runs under `history.persistence_write_timeout_ms`;
//! an attempt past that deadline counts as a failed one.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{Alert, OrchestrationResult};
use crate::resilience::BackoffPolicy;

#[async_trait]
pub trait ResultStore: Send + Sync + fmt::Debug {
    async fn append_result(&self, result: &OrchestrationResult) -> OrchestratorResult<()>;

    async fn append_alert(&self, alert: &Alert) -> OrchestratorResult<()>;

    async fn get_result(&self, request_id: Uuid) -> OrchestratorResult<Option<OrchestrationResult>>;

    /// Most recent results first
    async fn recent_results(&self, limit: usize) -> OrchestratorResult<Vec<OrchestrationResult>>;
}

/// Process-local store, used when no backend is configured
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: DashMap<Uuid, Arc<OrchestrationResult>>,
    alerts: DashMap<Uuid, Alert>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn append_result(&self, result: &OrchestrationResult) -> OrchestratorResult<()> {
        self.results.insert(result.request_id, Arc::new(result.clone()));
        Ok(())
    }

    async fn append_alert(&self, alert: &Alert) -> OrchestratorResult<()> {
        self.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_result(&self, request_id: Uuid) -> OrchestratorResult<Option<OrchestrationResult>> {
        Ok(self.results.get(&request_id).map(|result| result.as_ref().clone()))
    }

    async fn recent_results(&self, limit: usize) -> OrchestratorResult<Vec<OrchestrationResult>> {
        let mut results: Vec<Arc<OrchestrationResult>> =
            self.results.iter().map(|entry| entry.value().clone()).collect();
        results.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(results
            .into_iter()
            .take(limit)
            .map(|result| result.as_ref().clone())
            .collect())
    }
}

/// Wraps a [`ResultStore`] with bounded, deadline-limited retries.
/// Exhausted writes are logged and dropped; they never fail the request
/// that produced them.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    store: Arc<dyn ResultStore>,
    policy: BackoffPolicy,
    attempt_timeout: Duration,
}

impl AuditWriter {
    /// `attempts` counts the first write, so `attempts - 1` retries follow it
    pub fn new(
        store: Arc<dyn ResultStore>,
        attempts: u32,
        attempt_timeout: Duration,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            policy: policy.with_max_retries(attempts.saturating_sub(1)),
            attempt_timeout,
        }
    }

    /// Persist a result and the alerts it raised from a spawned task, so
    /// the caller never waits on the store.
    pub fn spawn_write(&self, result: Arc<OrchestrationResult>) {
        let writer = self.clone();
        tokio::spawn(async move {
            writer.write_result(&result).await;
            for alert in &result.alerts {
                writer.write_alert(alert).await;
            }
        });
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub async fn write_result(&self, result: &OrchestrationResult) -> bool {
        let id = result.request_id.to_string();
        self.with_retry("result", &id, || self.store.append_result(result)).await
    }

    pub async fn write_alert(&self, alert: &Alert) -> bool {
        let id = alert.id.to_string();
        self.with_retry("alert", &id, || self.store.append_alert(alert)).await
    }

    async fn with_retry<F, Fut>(&self, kind: &str, id: &str, write: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = OrchestratorResult<()>>,
    {
        let mut retry = 0;
        loop {
            let attempt = match tokio::time::timeout(self.attempt_timeout, write()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(OrchestratorError::Persistence(format!(
                    "write timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };
            match attempt {
                Ok(()) => {
                    debug!(kind, id, retries = retry, "Persisted audit record");
                    return true;
                }
                Err(err) => {
                    retry += 1;
                    match self.policy.delay_for(retry) {
                        Some(delay) => {
                            warn!(kind, id, retry, error = %err, "Audit write failed, retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(kind, id, error = %err, "Audit write failed, giving up");
                            return false;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::empty_result;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` writes
    #[derive(Debug)]
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
        inner: InMemoryResultStore,
    }

    #[async_trait]
    impl ResultStore for FlakyStore {
        async fn append_result(&self, result: &OrchestrationResult) -> OrchestratorResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(OrchestratorError::Persistence("connection reset".into()));
            }
            self.inner.append_result(result).await
        }

        async fn append_alert(&self, alert: &Alert) -> OrchestratorResult<()> {
            self.inner.append_alert(alert).await
        }

        async fn get_result(&self, request_id: Uuid) -> OrchestratorResult<Option<OrchestrationResult>> {
            self.inner.get_result(request_id).await
        }

        async fn recent_results(&self, limit: usize) -> OrchestratorResult<Vec<OrchestrationResult>> {
            self.inner.recent_results(limit).await
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            failures,
            calls: AtomicU32::new(0),
            inner: InMemoryResultStore::new(),
        })
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_writer_retries_until_success() {
        let store = flaky(2);
        let writer = AuditWriter::new(store.clone(), 3, Duration::from_secs(1), fast_policy());

        assert!(writer.write_result(&empty_result(Uuid::new_v4())).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.result_count(), 1);
    }

    #[tokio::test]
    async fn test_writer_gives_up_after_attempts() {
        let store = flaky(10);
        let writer = AuditWriter::new(store.clone(), 3, Duration::from_secs(1), fast_policy());

        assert!(!writer.write_result(&empty_result(Uuid::new_v4())).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.result_count(), 0);
    }

    /// Never completes an append
    #[derive(Debug, Default)]
    struct StalledStore {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ResultStore for StalledStore {
        async fn append_result(&self, _result: &OrchestrationResult) -> OrchestratorResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn append_alert(&self, _alert: &Alert) -> OrchestratorResult<()> {
            std::future::pending().await
        }

        async fn get_result(&self, _request_id: Uuid) -> OrchestratorResult<Option<OrchestrationResult>> {
            Ok(None)
        }

        async fn recent_results(&self, _limit: usize) -> OrchestratorResult<Vec<OrchestrationResult>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_stalled_write_counts_as_failed_attempt() {
        let store = Arc::new(StalledStore::default());
        let writer = AuditWriter::new(store.clone(), 2, Duration::from_millis(20), fast_policy());

        let written = tokio::time::timeout(
            Duration::from_secs(2),
            writer.write_result(&empty_result(Uuid::new_v4())),
        )
        .await
        .expect("write must respect its deadline");

        assert!(!written);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_appends_are_idempotent() {
        let store = InMemoryResultStore::new();
        let result = empty_result(Uuid::new_v4());

        store.append_result(&result).await.unwrap();
        store.append_result(&result).await.unwrap();

        assert_eq!(store.result_count(), 1);
        assert_eq!(store.get_result(result.request_id).await.unwrap(), Some(result));
        assert_eq!(store.get_result(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recent_results_newest_first() {
        let store = InMemoryResultStore::new();
        let mut older = empty_result(Uuid::new_v4());
        older.completed_at = Utc::now() - chrono::Duration::seconds(10);
        let newer = empty_result(Uuid::new_v4());
        store.append_result(&older).await.unwrap();
        store.append_result(&newer).await.unwrap();

        let recent = store.recent_results(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].request_id, newer.request_id);
    }
}
