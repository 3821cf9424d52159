//! # System Constants
//!
//! Event names, status groups and fixed messages shared by the orchestration
//! components.

use serde::{Deserialize, Serialize};

pub use crate::state_machine::JobState as JobStatus;

/// Lifecycle events published on the orchestration event channel
pub mod events {
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_CANCELLED: &str = "job.cancelled";
    pub const JOB_CANCEL_REQUESTED: &str = "job.cancel_requested";
    pub const JOB_TIMED_OUT: &str = "job.timed_out";

    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_SKIPPED: &str = "step.skipped";
}

/// System-wide constants
pub mod system {
    pub const FLEET_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Failure reason recorded for jobs found running at start-up
    pub const ORPHANED_JOB_REASON: &str = "orchestrator restarted";

    /// Default capacity of the lifecycle event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 1000;
}

/// Status groupings for common queries
pub mod status_groups {
    use super::JobStatus;

    /// Job statuses that accept no further transitions
    pub const JOB_FINAL_STATES: &[JobStatus] =
        &[JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

    /// Job statuses whose run time counts toward average duration
    pub const JOB_FINISHED_RUN_STATES: &[JobStatus] = &[JobStatus::Completed, JobStatus::Failed];

    /// Job statuses the dispatcher and sweeper act on
    pub const JOB_ACTIVE_STATES: &[JobStatus] = &[JobStatus::Queued, JobStatus::Running];
}

/// Orchestration system health indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Dispatcher and sweeper are running
    Healthy,
    /// One background loop has exited unexpectedly
    Degraded,
    /// Shutdown was requested
    Stopped,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}
