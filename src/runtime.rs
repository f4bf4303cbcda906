//! # Orchestration Runtime
//!
//! Process-wide mutable state for one orchestrator instance. Nothing in the
//! crate is a global: the coordinator, health checker, monitor and optimizer
//! all receive an `Arc<OrchestrationRuntime>`, so independent orchestrators
//! (one per test, for instance) never share breakers or alerts.
//!
//! Locking is per key wherever state is keyed: stage status and breakers
//! live in `DashMap`s, cached stage outputs are keyed by stage and input
//! fingerprint. Tunables sit behind a `RwLock` read once per request, and
//! optimization changes are serialized through a single async mutex.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::models::{HealthSnapshot, OrchestrationResult, StageResult, StageStatus};
use crate::monitoring::AlertStore;
use crate::optimization::Tunables;
use crate::resilience::CircuitBreaker;
use crate::stage::{StageId, StageInput, StageOutput};

/// Last known execution state of one stage across requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatusEntry {
    pub stage: StageId,
    pub last_status: StageStatus,
    pub last_updated_at: DateTime<Utc>,
    pub total_runs: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
}

impl StageStatusEntry {
    fn new(stage: StageId) -> Self {
        Self {
            stage,
            last_status: StageStatus::Pending,
            last_updated_at: Utc::now(),
            total_runs: 0,
            total_failures: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

#[derive(Debug)]
struct HealthCache {
    snapshot: Arc<HealthSnapshot>,
    refreshed_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct CachedOutput {
    output: StageOutput,
    stored_at: Instant,
}

/// TTL cache of stage outputs keyed by stage id and input fingerprint.
/// At capacity, `put` sweeps expired entries and then evicts the oldest.
#[derive(Debug)]
pub struct StageCache {
    entries: DashMap<(StageId, u64), CachedOutput>,
    ttl: Duration,
    capacity: usize,
}

impl StageCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Stable fingerprint of a stage input within this process
    pub fn fingerprint(input: &StageInput) -> u64 {
        let mut hasher = DefaultHasher::new();
        input.to_value().to_string().hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&self, stage: StageId, fingerprint: u64) -> Option<StageOutput> {
        let key = (stage, fingerprint);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => return Some(entry.output.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    pub fn put(&self, stage: StageId, fingerprint: u64, output: StageOutput) {
        let key = (stage, fingerprint);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room();
        }
        self.entries.insert(
            (stage, fingerprint),
            CachedOutput {
                output,
                stored_at: Instant::now(),
            },
        );
    }

    fn make_room(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);

        let overflow = (self.entries.len() + 1).saturating_sub(self.capacity);
        if overflow == 0 {
            return;
        }
        let mut by_age: Vec<((StageId, u64), Instant)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.stored_at))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);
        for (key, _) in by_age.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
        debug!(evicted = overflow, capacity = self.capacity, "Stage cache full, evicted oldest entries");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct OrchestrationRuntime {
    config: Arc<OrchestratorConfig>,
    stage_status: DashMap<StageId, StageStatusEntry>,
    breakers: DashMap<StageId, Arc<CircuitBreaker>>,
    health: RwLock<HealthCache>,
    alerts: AlertStore,
    semaphore: Arc<Semaphore>,
    stage_cache: StageCache,
    tunables: RwLock<Tunables>,
    history: Mutex<VecDeque<Arc<OrchestrationResult>>>,
    optimization_lock: Arc<tokio::sync::Mutex<()>>,
}

impl OrchestrationRuntime {
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        Self {
            stage_status: DashMap::new(),
            breakers: DashMap::new(),
            health: RwLock::new(HealthCache {
                snapshot: Arc::new(HealthSnapshot::initial()),
                refreshed_at: None,
            }),
            alerts: AlertStore::from_config(&config.monitor),
            semaphore: Arc::new(Semaphore::new(config.coordinator.max_concurrent_stages)),
            stage_cache: StageCache::new(
                config.coordinator.stage_cache_ttl(),
                config.coordinator.stage_cache_capacity,
            ),
            tunables: RwLock::new(Tunables::from_config(&config)),
            history: Mutex::new(VecDeque::with_capacity(config.history.capacity)),
            optimization_lock: Arc::new(tokio::sync::Mutex::new(())),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // Stage status map

    pub fn record_stage_result(&self, result: &StageResult) {
        let mut entry = self
            .stage_status
            .entry(result.stage)
            .or_insert_with(|| StageStatusEntry::new(result.stage));
        entry.last_status = result.status;
        entry.last_updated_at = Utc::now();
        if result.status == StageStatus::Skipped {
            return;
        }
        entry.total_runs += 1;
        if result.status.is_failure() {
            entry.total_failures += 1;
            entry.consecutive_failures += 1;
            entry.last_error = result.errors.last().cloned();
        } else {
            entry.consecutive_failures = 0;
        }
    }

    pub fn stage_status(&self, stage: StageId) -> Option<StageStatusEntry> {
        self.stage_status.get(&stage).map(|entry| entry.clone())
    }

    // Circuit breakers

    /// The breaker for `stage`, created from configuration on first use
    pub fn breaker(&self, stage: StageId, stage_name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(stage)
            .or_insert_with(|| {
                let settings = &self.config.circuit_breakers;
                if settings.enabled {
                    Arc::new(CircuitBreaker::new(stage_name, &settings.for_stage(stage_name)))
                } else {
                    Arc::new(CircuitBreaker::disabled(stage_name))
                }
            })
            .clone()
    }

    pub fn existing_breaker(&self, stage: StageId) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(&stage).map(|breaker| breaker.clone())
    }

    // Health snapshot cache

    pub fn health_snapshot(&self) -> Arc<HealthSnapshot> {
        self.health.read().snapshot.clone()
    }

    pub fn store_health(&self, snapshot: Arc<HealthSnapshot>) {
        let mut cache = self.health.write();
        cache.snapshot = snapshot;
        cache.refreshed_at = Some(Instant::now());
    }

    /// Whether no probe ran yet or the last one is older than `threshold`
    pub fn health_is_stale(&self, threshold: Duration) -> bool {
        match self.health.read().refreshed_at {
            Some(refreshed_at) => refreshed_at.elapsed() > threshold,
            None => true,
        }
    }

    // Shared resources

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    pub fn stage_cache(&self) -> &StageCache {
        &self.stage_cache
    }

    pub fn optimization_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.optimization_lock.clone()
    }

    // Tunables

    pub fn tunables(&self) -> Tunables {
        *self.tunables.read()
    }

    pub fn update_tunables<F, R>(&self, update: F) -> R
    where
        F: FnOnce(&mut Tunables) -> R,
    {
        let mut tunables = self.tunables.write();
        update(&mut tunables)
    }

    // History ring buffer

    pub fn push_history(&self, result: Arc<OrchestrationResult>) {
        let capacity = self.config.history.capacity;
        let mut history = self.history.lock();
        while history.len() >= capacity {
            history.pop_front();
        }
        debug!(request_id = %result.request_id, "Archived orchestration result");
        history.push_back(result);
    }

    /// Most recent results first
    pub fn history(&self, limit: usize) -> Vec<Arc<OrchestrationResult>> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn history_entry(&self, request_id: Uuid) -> Option<Arc<OrchestrationResult>> {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|result| result.request_id == request_id)
            .cloned()
    }
}
