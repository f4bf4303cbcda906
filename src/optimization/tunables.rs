//! Shared runtime tunables adjusted by the optimizer.

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::models::TunableChange;

/// Live values the coordinator reads at the start of every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    pub caching_enabled: bool,
    pub validation_strictness: f64,
    /// Retries after the first attempt for transient stage failures
    pub retry_attempts: u32,
    pub wave_concurrency: usize,
}

impl Tunables {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            caching_enabled: config.coordinator.caching_enabled,
            validation_strictness: config.coordinator.validation_strictness,
            retry_attempts: config.coordinator.retry.max_attempts,
            wave_concurrency: config.coordinator.wave_concurrency,
        }
    }

    /// Current value of the tunable `change` targets
    pub fn current(&self, change: &TunableChange) -> TunableChange {
        match change {
            TunableChange::CachingEnabled(_) => TunableChange::CachingEnabled(self.caching_enabled),
            TunableChange::ValidationStrictness(_) => {
                TunableChange::ValidationStrictness(self.validation_strictness)
            }
            TunableChange::RetryAttempts(_) => TunableChange::RetryAttempts(self.retry_attempts),
            TunableChange::WaveConcurrency(_) => TunableChange::WaveConcurrency(self.wave_concurrency),
        }
    }

    /// Apply a change and return the value it replaced
    pub fn apply(&mut self, change: TunableChange) -> TunableChange {
        let prior = self.current(&change);
        match change {
            TunableChange::CachingEnabled(value) => self.caching_enabled = value,
            TunableChange::ValidationStrictness(value) => {
                self.validation_strictness = value.clamp(0.0, 1.0)
            }
            TunableChange::RetryAttempts(value) => self.retry_attempts = value,
            TunableChange::WaveConcurrency(value) => self.wave_concurrency = value.max(1),
        }
        prior
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_returns_prior_value() {
        let mut tunables = Tunables::default();
        let prior = tunables.apply(TunableChange::RetryAttempts(4));
        assert_eq!(prior, TunableChange::RetryAttempts(2));
        assert_eq!(tunables.retry_attempts, 4);

        tunables.apply(prior);
        assert_eq!(tunables.retry_attempts, 2);
    }

    #[test]
    fn test_values_are_bounded() {
        let mut tunables = Tunables::default();
        tunables.apply(TunableChange::ValidationStrictness(1.4));
        tunables.apply(TunableChange::WaveConcurrency(0));
        assert_eq!(tunables.validation_strictness, 1.0);
        assert_eq!(tunables.wave_concurrency, 1);
    }
}
