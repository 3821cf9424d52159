//! # Job Store
//!
//! The job registry behind the [`JobManager`](crate::orchestration::JobManager).
//! Implementations must make [`JobStore::transition`] atomic per job: the
//! expected-state check, the state machine step and the write happen as one
//! unit, so concurrent callers (dispatcher, workers, cancel requests, the
//! timeout sweep) can never interleave on the same job.
//!
//! Logs are append-only and keyed by line offset; re-appending an offset that
//! is already stored is a no-op.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryJobStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;

use crate::logs::LogLine;
use crate::models::{Job, JobFilter, JobOutcome, JobStatistics};
use crate::state_machine::{JobEvent, JobState, StateMachineError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {job_id} not found")]
    NotFound { job_id: Uuid },

    #[error("job {job_id} is {actual}, expected {expected}")]
    StatusMismatch {
        job_id: Uuid,
        expected: JobState,
        actual: JobState,
    },

    #[error(transparent)]
    InvalidTransition(#[from] StateMachineError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {reason}")]
    Corrupt { reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A requested status change
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Fail with `StatusMismatch` unless the job is currently in this state
    pub expected: Option<JobState>,
    pub event: JobEvent,
    pub outcome: Option<JobOutcome>,
}

impl Transition {
    pub fn new(event: JobEvent) -> Self {
        Self {
            expected: None,
            event,
            outcome: None,
        }
    }

    pub fn expecting(mut self, state: JobState) -> Self {
        self.expected = Some(state);
        self
    }

    pub fn with_outcome(mut self, outcome: JobOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// Persistence contract for jobs and their logs
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, job: &Job) -> StoreResult<()>;

    async fn get(&self, job_id: Uuid) -> StoreResult<Job>;

    /// Atomically check, apply and persist one state machine event
    async fn transition(&self, job_id: Uuid, transition: Transition) -> StoreResult<Job>;

    /// Flag a running job for cooperative cancellation; other states are
    /// returned unchanged
    async fn mark_cancel_requested(&self, job_id: Uuid) -> StoreResult<Job>;

    async fn append_log(&self, job_id: Uuid, line: &LogLine) -> StoreResult<()>;

    /// Lines at or after `offset`, in order
    async fn logs(&self, job_id: Uuid, offset: u64) -> StoreResult<Vec<LogLine>>;

    /// One page of jobs, newest first, plus the total matching the filter.
    /// `page` is 1-based.
    async fn list(&self, filter: &JobFilter, page: u32, page_size: u32)
        -> StoreResult<(Vec<Job>, u64)>;

    /// Every job in `status`, oldest first
    async fn jobs_with_status(&self, status: JobState) -> StoreResult<Vec<Job>>;

    async fn statistics(&self) -> StoreResult<JobStatistics>;

    /// Delete terminal jobs created before `cutoff`, with their logs
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;
}

pub(crate) fn page_offset(page: u32, page_size: u32) -> usize {
    (page.max(1) as usize - 1).saturating_mul(page_size as usize)
}

/// Shared check-and-apply step used inside each store's critical section
pub(crate) fn apply_transition(
    job: &mut Job,
    transition: Transition,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    if let Some(expected) = transition.expected {
        if job.status != expected {
            return Err(StoreError::StatusMismatch {
                job_id: job.job_id,
                expected,
                actual: job.status,
            });
        }
    }

    crate::state_machine::JobStateMachine::apply(job, &transition.event, now)?;
    if let Some(outcome) = transition.outcome {
        job.outcome = Some(outcome);
    }
    if job.is_terminal() {
        job.cancel_requested = false;
    }
    Ok(())
}
