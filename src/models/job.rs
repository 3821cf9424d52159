//! # Job Model
//!
//! A `Job` is one orchestration run: the plan produced for a request, the
//! hosts it targets, and its lifecycle state.
//!
//! ## Ownership
//!
//! Jobs are created by the job manager and mutated only through a
//! [`JobStore`](crate::store::JobStore) transition, which applies the
//! [`JobStateMachine`](crate::state_machine::JobStateMachine) table atomically.
//! Log lines are kept beside the job in the store and in the live log hub; they
//! are not part of this struct, so cloning a job never copies its log.
//!
//! ## Timestamps
//!
//! - `created_at` is fixed at creation and orders the dispatch queue (FIFO).
//! - `updated_at` moves forward on every status change and never precedes
//!   `created_at`.
//! - `started_at` / `finished_at` are set on dispatch and on reaching a
//!   terminal state.
//!
//! ## Outcome
//!
//! When a worker finishes it records a [`JobOutcome`]: one [`StepResult`] per
//! plan step (skipped steps included), the failing step if any, and the run
//! duration.

use crate::planner::{ExecutionMode, ExecutionPlan, PlanSummary};
use crate::state_machine::JobState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of one plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub component: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    /// Executor reported host changes
    pub changed: bool,
    pub exit_code: Option<i32>,
}

impl StepResult {
    pub fn skipped(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: StepStatus::Skipped,
            started_at: None,
            finished_at: None,
            message: Some(reason.into()),
            changed: false,
            exit_code: None,
        }
    }
}

/// Worker-recorded result of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub steps: Vec<StepResult>,
    /// Component whose step stopped the run (or the first failure under continue-on-error)
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl JobOutcome {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
    }
}

/// One orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobState,
    pub environment: String,
    pub platform: String,
    /// Components as requested, before resolution
    pub components: Vec<String>,
    pub plan: ExecutionPlan,
    /// Empty means every eligible host
    pub target_hosts: BTreeSet<String>,
    pub execution_mode: ExecutionMode,
    pub options: Value,
    pub owner: Option<String>,
    pub message: String,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Cancellation was requested while running and has not yet taken effect
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Job {
    /// A freshly queued job
    pub fn new(
        environment: impl Into<String>,
        components: Vec<String>,
        plan: ExecutionPlan,
        target_hosts: BTreeSet<String>,
        options: Value,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            status: JobState::Queued,
            environment: environment.into(),
            platform: plan.platform.clone(),
            components,
            execution_mode: plan.mode,
            plan,
            target_hosts,
            options,
            owner,
            message: "Job created and queued".to_string(),
            outcome: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the job targets every host
    pub fn targets_all_hosts(&self) -> bool {
        self.target_hosts.is_empty()
    }

    /// `created_at + timeout`, or `None` past the representable range
    pub fn deadline(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        self.created_at.checked_add_signed(timeout)
    }

    /// Whether options ask for the remaining steps to run after a failure
    pub fn continue_on_error(&self) -> bool {
        self.options
            .get("continue_on_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Run duration in milliseconds, when both ends are known
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id,
            status: self.status,
            environment: self.environment.clone(),
            owner: self.owner.clone(),
            message: self.message.clone(),
            target_hosts: self.target_hosts.iter().cloned().collect(),
            plan: self.plan.summary(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing view of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobState,
    pub environment: String,
    pub owner: Option<String>,
    pub message: String,
    pub target_hosts: Vec<String>,
    pub plan: PlanSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
