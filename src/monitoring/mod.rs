//! # Monitoring
//!
//! Rolling metrics, anomaly baselines, alert lifecycle and notification sinks.

pub mod alerts;
pub mod baseline;
pub mod monitor;
pub mod sink;
pub mod trends;

pub use alerts::AlertStore;
pub use baseline::EwmaBaseline;
pub use monitor::Monitor;
pub use sink::{AlertSink, LogAlertSink, QueuedAlertSink};
pub use trends::{PerformanceTrend, Trend};
