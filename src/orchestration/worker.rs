//! # Job Worker
//!
//! Runs one job's plan, step by step, on its own task. The worker holds a
//! worker slot for its whole life; the slot, the host reservation and the
//! cancellation flag are released together when the worker ends, however it
//! ends.
//!
//! Steps are atomic from the worker's point of view: the cancellation flag is
//! read only between steps, and a running step is never interrupted.

use super::job_manager::JobManager;
use crate::constants::events;
use crate::executor::StepContext;
use crate::logs::LineSink;
use crate::models::{Job, JobOutcome, StepResult, StepStatus};
use crate::planner::ExecutionMode;
use crate::state_machine::{JobEvent, JobState};
use crate::store::{StoreError, Transition};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// How a run ended, before it is recorded
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Failed(String),
    Cancelled,
}

impl RunEnd {
    fn event(&self) -> JobEvent {
        match self {
            Self::Completed => JobEvent::Complete,
            Self::Failed(reason) => JobEvent::Fail(reason.clone()),
            Self::Cancelled => JobEvent::Cancel,
        }
    }
}

/// Releases everything a running job holds when the worker ends
struct WorkerGuard {
    manager: Arc<JobManager>,
    job_id: Uuid,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.manager.release_job(self.job_id);
        // Return the slot before waking the dispatcher so the next cycle can use it
        drop(self.permit.take());
        self.manager.notify_dispatcher();
    }
}

impl JobManager {
    pub(super) async fn run_job(
        self: Arc<Self>,
        job: Job,
        permit: OwnedSemaphorePermit,
        cancel: Arc<AtomicBool>,
    ) {
        let _guard = WorkerGuard {
            manager: Arc::clone(&self),
            job_id: job.job_id,
            permit: Some(permit),
        };

        let log = match self.job_log(job.job_id).await {
            Ok(log) => log,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "🔧 WORKER: Rebuilding missing job log");
                self.logs.open(job.job_id)
            }
        };
        let sink = LineSink::spawn(log, Arc::clone(&self.store));

        self.events.publish(
            events::JOB_STARTED,
            job.job_id,
            JobState::Running,
            json!({ "steps": job.plan.len() }),
        );
        let hosts = if job.targets_all_hosts() {
            "all".to_string()
        } else {
            job.target_hosts.iter().cloned().collect::<Vec<_>>().join(",")
        };
        sink.line(format!(
            "Deployment started: {} step(s) in {} mode on hosts {}",
            job.plan.len(),
            job.execution_mode,
            hosts
        ));

        let started = Instant::now();
        let (steps, end) = if job.execution_mode == ExecutionMode::DryRun {
            sink.lines(job.plan.describe());
            let steps = job
                .plan
                .steps
                .iter()
                .map(|step| StepResult::skipped(&step.component, "dry run"))
                .collect();
            (steps, RunEnd::Completed)
        } else {
            self.execute_steps(&job, &sink, &cancel).await
        };

        let failed_step = steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| s.component.clone());
        let outcome = JobOutcome {
            steps,
            failed_step,
            error: match &end {
                RunEnd::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        sink.flush().await;
        self.finish_run(&job, &sink, end, outcome).await;
        sink.close().await;
    }

    async fn execute_steps(
        &self,
        job: &Job,
        sink: &LineSink,
        cancel: &AtomicBool,
    ) -> (Vec<StepResult>, RunEnd) {
        let total = job.plan.len();
        let continue_on_error = job.continue_on_error();
        let target_hosts: Vec<String> = job.target_hosts.iter().cloned().collect();
        let mut results = Vec::with_capacity(total);
        let mut first_failure: Option<String> = None;

        for (index, step) in job.plan.steps.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                sink.line(format!(
                    "Cancellation observed before step {}/{total}; skipping remaining steps",
                    index + 1
                ));
                results.extend(
                    job.plan.steps[index..]
                        .iter()
                        .map(|s| StepResult::skipped(&s.component, "job cancelled")),
                );
                return (results, RunEnd::Cancelled);
            }

            sink.line(format!("[{}/{total}] {}", index + 1, step.summary));
            self.events.publish(
                events::STEP_STARTED,
                job.job_id,
                JobState::Running,
                json!({ "component": step.component, "index": index }),
            );

            let context = StepContext {
                job_id: job.job_id,
                environment: job.environment.clone(),
                platform: job.platform.clone(),
                step: step.clone(),
                step_count: total,
                target_hosts: target_hosts.clone(),
                mode: job.execution_mode,
                options: job.options.clone(),
            };

            let started_at = Utc::now();
            let report = self.executor.execute(&context, sink).await;
            let finished_at = Utc::now();

            let result = match report {
                Ok(report) if report.success => StepResult {
                    component: step.component.clone(),
                    status: StepStatus::Succeeded,
                    started_at: Some(started_at),
                    finished_at: Some(finished_at),
                    message: report.message,
                    changed: report.changed,
                    exit_code: report.exit_code,
                },
                Ok(report) => StepResult {
                    component: step.component.clone(),
                    status: StepStatus::Failed,
                    started_at: Some(started_at),
                    finished_at: Some(finished_at),
                    message: Some(
                        report
                            .message
                            .unwrap_or_else(|| "executor reported failure".to_string()),
                    ),
                    changed: report.changed,
                    exit_code: report.exit_code,
                },
                Err(e) => {
                    error!(
                        job_id = %job.job_id,
                        component = %step.component,
                        executor = self.executor.name(),
                        error = %format!("{e:#}"),
                        "🔧 WORKER: Executor error"
                    );
                    sink.line(format!("executor error: {e:#}"));
                    StepResult {
                        component: step.component.clone(),
                        status: StepStatus::Failed,
                        started_at: Some(started_at),
                        finished_at: Some(finished_at),
                        message: Some(format!("{e:#}")),
                        changed: false,
                        exit_code: None,
                    }
                }
            };

            let failed = result.status == StepStatus::Failed;
            if failed {
                let reason = format!(
                    "step '{}' failed: {}",
                    step.component,
                    result.message.as_deref().unwrap_or("unknown error")
                );
                sink.line(format!("✗ {reason}"));
                self.events.publish(
                    events::STEP_FAILED,
                    job.job_id,
                    JobState::Running,
                    json!({ "component": step.component, "reason": reason }),
                );
                first_failure.get_or_insert(reason);
            } else {
                sink.line(format!("✓ {} {} done", step.component, step.version));
                self.events.publish(
                    events::STEP_COMPLETED,
                    job.job_id,
                    JobState::Running,
                    json!({ "component": step.component, "changed": result.changed }),
                );
            }
            results.push(result);

            if failed && !continue_on_error {
                let skipped = &job.plan.steps[index + 1..];
                for rest in skipped {
                    sink.line(format!("- {} skipped", rest.component));
                    self.events.publish(
                        events::STEP_SKIPPED,
                        job.job_id,
                        JobState::Running,
                        json!({ "component": rest.component }),
                    );
                }
                results.extend(skipped.iter().map(|s| {
                    StepResult::skipped(&s.component, format!("skipped after {} failed", step.component))
                }));
                break;
            }
        }

        match first_failure {
            Some(reason) => (results, RunEnd::Failed(reason)),
            None => (results, RunEnd::Completed),
        }
    }

    async fn finish_run(&self, job: &Job, sink: &LineSink, end: RunEnd, outcome: JobOutcome) {
        let transition = Transition::new(end.event())
            .expecting(JobState::Running)
            .with_outcome(outcome);

        match self.store.transition(job.job_id, transition).await {
            Ok(finished) => {
                sink.line(finished.message.clone());
                let name = match finished.status {
                    JobState::Completed => events::JOB_COMPLETED,
                    JobState::Cancelled => events::JOB_CANCELLED,
                    _ => events::JOB_FAILED,
                };
                crate::log_job!(info, "job_finished",
                    job_id: finished.job_id,
                    status: finished.status,
                    duration_ms: finished.duration_ms()
                );
                self.events.publish(
                    name,
                    finished.job_id,
                    finished.status,
                    json!({
                        "message": finished.message,
                        "failed_step": finished.outcome.as_ref().and_then(|o| o.failed_step.clone()),
                    }),
                );
            }
            // The timeout sweep got there first
            Err(StoreError::StatusMismatch { actual, .. }) => {
                debug!(
                    job_id = %job.job_id,
                    status = %actual,
                    "🔧 WORKER: Job finished elsewhere; outcome not recorded"
                );
            }
            Err(e) => {
                error!(
                    job_id = %job.job_id,
                    error = %e,
                    "🔧 WORKER: Failed to record job outcome"
                );
                sink.line(format!("Failed to record job outcome: {e}"));
            }
        }
    }
}
