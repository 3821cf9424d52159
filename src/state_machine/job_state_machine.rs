use super::errors::{StateMachineError, StateMachineResult};
use super::events::JobEvent;
use super::states::JobState;
use crate::models::Job;
use chrono::{DateTime, Utc};

/// Transition table and bookkeeping for job status changes.
///
/// Stores call [`JobStateMachine::apply`] inside their single mutation point
/// for a job, so the table is the only place legal transitions are defined.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStateMachine;

impl JobStateMachine {
    /// Determine the target state for an event from the current state
    pub fn determine_target_state(
        current_state: JobState,
        event: &JobEvent,
    ) -> StateMachineResult<JobState> {
        let target = match (current_state, event) {
            (JobState::Queued, JobEvent::Dispatch) => JobState::Running,
            (JobState::Queued, JobEvent::Cancel) => JobState::Cancelled,

            (JobState::Running, JobEvent::Complete) => JobState::Completed,
            (JobState::Running, JobEvent::Fail(_)) => JobState::Failed,
            (JobState::Running, JobEvent::Cancel) => JobState::Cancelled,

            (from, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply `event` to `job`, updating status, timestamps and message.
    ///
    /// Returns the previous state. `updated_at` never moves backwards even if
    /// `now` is behind the last recorded update.
    pub fn apply(job: &mut Job, event: &JobEvent, now: DateTime<Utc>) -> StateMachineResult<JobState> {
        let previous = job.status;
        let target = Self::determine_target_state(previous, event)?;

        let now = now.max(job.updated_at).max(job.created_at);
        job.status = target;
        job.updated_at = now;

        match target {
            JobState::Running => {
                job.started_at = Some(now);
                job.message = "Deployment started".to_string();
            }
            JobState::Completed => {
                job.message = "Deployment completed successfully".to_string();
            }
            JobState::Failed => {
                job.message = format!(
                    "Deployment failed: {}",
                    event.error_message().unwrap_or("unknown error")
                );
            }
            JobState::Cancelled => {
                job.message = "Job cancelled by user".to_string();
            }
            JobState::Queued => {}
        }

        if target.is_terminal() {
            job.finished_at = Some(now);
        }

        Ok(previous)
    }
}
