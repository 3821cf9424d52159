//! # Sweeps
//!
//! Periodic maintenance run by the sweeper loop:
//!
//! - **timeout**: running jobs past `created_at + job_timeout` are failed and
//!   their worker is told to stop at the next step boundary
//! - **cleanup**: terminal jobs created before the retention cutoff are deleted
//!   together with their logs
//!
//! Start-up recovery lives here too: jobs a previous process left `running`
//! have no worker and are failed.

use super::job_manager::JobManager;
use super::types::SweepReport;
use crate::constants::{events, system::ORPHANED_JOB_REASON};
use crate::error::Result;
use crate::state_machine::{JobEvent, JobState};
use crate::store::{StoreError, Transition};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

impl JobManager {
    /// Run both sweeps now
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Run both sweeps as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let timed_out = self.sweep_timeouts_at(now).await?;
        let cleaned_up = self.cleanup_expired_at(now).await?;
        if !timed_out.is_empty() || !cleaned_up.is_empty() {
            crate::log_dispatch!(info, "sweep_completed",
                timed_out: timed_out.len(),
                cleaned_up: cleaned_up.len()
            );
        }
        Ok(SweepReport {
            timed_out,
            cleaned_up,
        })
    }

    /// Fail every running job whose deadline is at or before `now`
    pub async fn sweep_timeouts_at(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let Some(timeout) = self.config.job_timeout() else {
            return Ok(Vec::new());
        };
        let reason = format!("timed out after {} minutes", self.config.job_timeout_minutes);
        let mut timed_out = Vec::new();

        for job in self.store.jobs_with_status(JobState::Running).await? {
            match job.deadline(timeout) {
                Some(deadline) if deadline <= now => {}
                _ => continue,
            }

            let transition =
                Transition::new(JobEvent::Fail(reason.clone())).expecting(JobState::Running);
            match self.store.transition(job.job_id, transition).await {
                Ok(failed) => {
                    if let Some(flag) = self.cancellations.get(&job.job_id) {
                        flag.store(true, Ordering::SeqCst);
                    }
                    self.finish_log(job.job_id, &failed.message).await;
                    crate::log_job!(warn, "job_timed_out",
                        job_id: job.job_id,
                        created_at: job.created_at,
                        timeout_minutes: self.config.job_timeout_minutes
                    );
                    self.events.publish(
                        events::JOB_TIMED_OUT,
                        job.job_id,
                        failed.status,
                        json!({ "reason": reason }),
                    );
                    timed_out.push(job.job_id);
                }
                // Finished on its own in the meantime
                Err(StoreError::StatusMismatch { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(timed_out)
    }

    /// Delete terminal jobs created before `now - log_retention`
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let Some(cutoff) = self
            .config
            .log_retention()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return Ok(Vec::new());
        };
        let deleted = self.store.delete_finished_before(cutoff).await?;

        for job_id in &deleted {
            self.logs.remove(*job_id);
            crate::log_job!(debug, "job_cleaned_up", job_id: job_id, cutoff: cutoff);
        }

        Ok(deleted)
    }

    /// Fail jobs left `running` by a previous process
    pub async fn recover_orphans(&self) -> Result<Vec<Uuid>> {
        let mut recovered = Vec::new();

        for job in self.store.jobs_with_status(JobState::Running).await? {
            if self.cancellations.contains_key(&job.job_id) {
                continue;
            }

            let transition = Transition::new(JobEvent::Fail(ORPHANED_JOB_REASON.to_string()))
                .expecting(JobState::Running);
            match self.store.transition(job.job_id, transition).await {
                Ok(failed) => {
                    self.finish_log(job.job_id, &failed.message).await;
                    crate::log_job!(warn, "orphaned_job_failed", job_id: job.job_id);
                    self.events.publish(
                        events::JOB_FAILED,
                        job.job_id,
                        failed.status,
                        json!({ "reason": ORPHANED_JOB_REASON }),
                    );
                    recovered.push(job.job_id);
                }
                Err(StoreError::StatusMismatch { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recovered)
    }
}
