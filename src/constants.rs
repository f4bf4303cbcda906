//! # System Constants
//!
//! Operation names used in structured log records and alert sources.

/// Operation names passed to the structured logging helpers
pub mod operations {
    pub const ORCHESTRATION_STARTED: &str = "orchestration.started";
    pub const ORCHESTRATION_COMPLETED: &str = "orchestration.completed";
    pub const ORCHESTRATION_REJECTED: &str = "orchestration.rejected";
    pub const ORCHESTRATION_ABORTED: &str = "orchestration.aborted";

    pub const STAGE_COMPLETED: &str = "stage.completed";
    pub const STAGE_FAILED: &str = "stage.failed";
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    pub const STAGE_TIMEOUT: &str = "stage.timeout";
    pub const STAGE_SHORT_CIRCUITED: &str = "stage.short_circuited";
    pub const STAGE_CACHE_HIT: &str = "stage.cache_hit";
}

/// Alert sources raised by the monitor
pub mod sources {
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const HEALTH: &str = "health";
}

/// Skip reason recorded when a blocking-critical stage aborts the request
pub const ABORTED_REASON: &str = "aborted";
