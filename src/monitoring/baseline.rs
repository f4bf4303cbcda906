//! Exponentially weighted baseline used for anomaly detection.

use serde::{Deserialize, Serialize};

use crate::config::AnomalyConfig;

/// Floor for the baseline deviation, relative to the baseline mean
const MIN_RELATIVE_STD_DEV: f64 = 0.01;
const MIN_ABSOLUTE_STD_DEV: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EwmaBaseline {
    alpha: f64,
    warmup_samples: u64,
    mean: f64,
    variance: f64,
    samples: u64,
}

impl EwmaBaseline {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            alpha: config.alpha,
            warmup_samples: config.warmup_samples,
            mean: 0.0,
            variance: 0.0,
            samples: 0,
        }
    }

    /// Fold a sample into the baseline.
    ///
    /// Returns the sample's deviation from the baseline *before* the update,
    /// in baseline standard deviations, once the warm-up is complete.
    pub fn observe(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        if self.samples == 0 {
            self.mean = value;
            self.samples = 1;
            return None;
        }

        let z_score = (self.samples >= self.warmup_samples).then(|| {
            let std_dev = self
                .variance
                .sqrt()
                .max(self.mean.abs() * MIN_RELATIVE_STD_DEV)
                .max(MIN_ABSOLUTE_STD_DEV);
            (value - self.mean).abs() / std_dev
        });

        let diff = value - self.mean;
        let increment = self.alpha * diff;
        self.mean += increment;
        self.variance = (1.0 - self.alpha) * (self.variance + diff * increment);
        self.samples += 1;

        z_score
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn is_warm(&self) -> bool {
        self.samples >= self.warmup_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(warmup: u64) -> EwmaBaseline {
        EwmaBaseline::new(&AnomalyConfig {
            alpha: 0.2,
            std_dev_threshold: 3.0,
            warmup_samples: warmup,
        })
    }

    #[test]
    fn test_no_score_during_warmup() {
        let mut baseline = baseline(5);
        for value in [10.0, 11.0, 9.0, 10.0] {
            assert!(baseline.observe(value).is_none());
        }
        assert!(!baseline.is_warm());
    }

    #[test]
    fn test_spike_scores_high_against_steady_baseline() {
        let mut baseline = baseline(5);
        for i in 0..30 {
            baseline.observe(if i % 2 == 0 { 100.0 } else { 102.0 });
        }
        let steady = baseline.observe(101.0).unwrap();
        let spike = baseline.observe(400.0).unwrap();
        assert!(steady < 1.5);
        assert!(spike > 10.0);
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut baseline = baseline(1);
        baseline.observe(1.0);
        assert!(baseline.observe(f64::NAN).is_none());
        assert_eq!(baseline.samples(), 1);
    }
}
