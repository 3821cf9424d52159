//! # Dispatcher
//!
//! Moves queued jobs to `running` when a worker slot is free.
//!
//! Each cycle walks the queue oldest first. A job is dispatched only when its
//! hosts are disjoint from every running job and from every older job that is
//! still waiting, so a younger job can never overtake an older one on a shared
//! host. Running out of worker slots ends the cycle: later jobs wait their
//! turn even when their hosts are free.

use super::job_manager::JobManager;
use super::types::{DispatchReport, HostClaim};
use crate::error::Result;
use crate::state_machine::{JobEvent, JobState};
use crate::store::{StoreError, Transition};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use uuid::Uuid;

impl JobManager {
    /// Run one dispatch pass over the queue
    pub async fn dispatch_cycle(self: &Arc<Self>) -> Result<DispatchReport> {
        let _cycle = self.dispatch_lock.lock().await;

        let queued = self.store.jobs_with_status(JobState::Queued).await?;
        let mut report = DispatchReport::default();
        if queued.is_empty() {
            return Ok(report);
        }

        let mut blocked: Vec<HostClaim> = self.reservations.lock().values().cloned().collect();
        let total = queued.len();

        for (position, job) in queued.into_iter().enumerate() {
            let claim = HostClaim::for_job(&job);
            if blocked.iter().any(|held| held.overlaps(&claim)) {
                crate::log_dispatch!(debug, "job_waiting_on_hosts",
                    job_id: job.job_id,
                    claim: claim
                );
                blocked.push(claim);
                report.waiting_on_hosts += 1;
                continue;
            }

            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                report.waiting_on_capacity = total - position;
                crate::log_dispatch!(debug, "worker_pool_full",
                    waiting: report.waiting_on_capacity,
                    max_concurrent_jobs: self.config.max_concurrent_jobs
                );
                break;
            };

            // Flag and reservation exist before the job is visible as running,
            // so a cancel request or a concurrent preview always finds them
            let cancel = Arc::new(AtomicBool::new(false));
            self.cancellations.insert(job.job_id, Arc::clone(&cancel));
            self.reservations.lock().insert(job.job_id, claim.clone());

            let transition = Transition::new(JobEvent::Dispatch).expecting(JobState::Queued);
            match self.store.transition(job.job_id, transition).await {
                Ok(running) => {
                    blocked.push(claim);
                    report.dispatched.push(running.job_id);
                    crate::log_job!(info, "job_dispatched",
                        job_id: running.job_id,
                        mode: running.execution_mode.as_str(),
                        running: self.cancellations.len()
                    );
                    tokio::spawn(Arc::clone(self).run_job(running, permit, cancel));
                }
                // Cancelled between the queue read and the transition
                Err(StoreError::StatusMismatch { actual, .. }) => {
                    self.release_job(job.job_id);
                    crate::log_dispatch!(debug, "job_left_queue",
                        job_id: job.job_id,
                        status: actual
                    );
                }
                Err(e) => {
                    self.release_job(job.job_id);
                    return Err(e.into());
                }
            }
        }

        Ok(report)
    }

    /// Drop a job's cancellation flag and host reservation
    pub(super) fn release_job(&self, job_id: Uuid) {
        self.cancellations.remove(&job_id);
        self.reservations.lock().remove(&job_id);
    }

    /// Wake the dispatcher loop
    pub fn notify_dispatcher(&self) {
        self.dispatch_signal.notify_one();
    }

    /// Resolves when the dispatcher has been woken
    pub(crate) async fn dispatch_requested(&self) {
        self.dispatch_signal.notified().await;
    }
}
