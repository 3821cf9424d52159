//! # Cancellation Tests
//!
//! Queued jobs cancel immediately; running jobs stop at the next step
//! boundary; terminal jobs refuse.

use crate::common::{default_system, WAIT};
use fleet_core::models::{JobRequest, StepStatus};
use fleet_core::test_utils::{test_config, test_manager, wait_until, ScriptedExecutor};
use fleet_core::{FleetError, JobState};
use std::sync::Arc;

#[tokio::test]
async fn test_cancel_queued_job() {
    let executor = Arc::new(ScriptedExecutor::new());
    let manager = test_manager(test_config(), executor.clone());

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging"))
        .await
        .unwrap();
    let cancelled = manager.cancel_job(job.job_id).await.unwrap();

    assert_eq!(cancelled.status, JobState::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert!(cancelled.finished_at.is_some());

    let lines = manager.logs(job.job_id, 0).await.unwrap();
    assert_eq!(
        lines.last().map(|l| l.line.as_str()),
        Some("Job cancelled by user before dispatch")
    );
    // The stream is already closed
    let replay = manager.subscribe(job.job_id).await.unwrap().collect_lines().await;
    assert_eq!(replay, lines);

    let report = manager.dispatch_cycle().await.unwrap();
    assert!(report.is_idle());
    assert_eq!(executor.started(), 0);
}

#[tokio::test]
async fn test_cancel_terminal_job_is_rejected() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));

    let job = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    manager.cancel_job(job.job_id).await.unwrap();

    let err = manager.cancel_job(job.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        FleetError::AlreadyTerminal { job_id, status: JobState::Cancelled } if job_id == job.job_id
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_job_stops_at_step_boundary() {
    let (manager, executor, system) = default_system(ScriptedExecutor::new().gated()).await;

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging"))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || executor.started() == 1).await);

    // The first step is in progress; cancellation is only recorded
    let requested = manager.cancel_job(job.job_id).await.unwrap();
    assert_eq!(requested.status, JobState::Running);
    assert!(requested.cancel_requested);

    // A repeated request is accepted and changes nothing
    let again = manager.cancel_job(job.job_id).await.unwrap();
    assert_eq!(again.status, JobState::Running);

    executor.release(1);
    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .expect("job stops after the current step")
        .unwrap();

    assert_eq!(finished.status, JobState::Cancelled);
    assert_eq!(finished.message, "Job cancelled by user");
    assert_eq!(executor.components_for(job.job_id), vec!["python"]);

    let outcome = finished.outcome.unwrap();
    let statuses: Vec<StepStatus> = outcome.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Skipped, StepStatus::Skipped]
    );

    let lines: Vec<String> = manager
        .logs(job.job_id, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.line)
        .collect();
    assert_eq!(
        lines
            .iter()
            .filter(|l| l.starts_with("Cancellation requested"))
            .count(),
        1
    );
    assert!(lines
        .iter()
        .any(|l| l == "Cancellation observed before step 2/3; skipping remaining steps"));

    assert!(matches!(
        manager.cancel_job(job.job_id).await,
        Err(FleetError::AlreadyTerminal {
            status: JobState::Cancelled,
            ..
        })
    ));

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_last_step_lets_job_complete() {
    let (manager, executor, system) = default_system(ScriptedExecutor::new().gated()).await;

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging"))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || executor.started() == 1).await);
    executor.release(2);
    assert!(wait_until(WAIT, || executor.started() == 3).await);

    manager.cancel_job(job.job_id).await.unwrap();
    executor.release(1);

    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobState::Completed);
    assert!(!finished.cancel_requested);
    assert_eq!(executor.components_for(job.job_id).len(), 3);

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_job_frees_its_hosts() {
    let (manager, executor, system) = default_system(ScriptedExecutor::new().gated()).await;

    let first = manager
        .create_job(JobRequest::new(["api"], "staging").with_hosts(["h1"]))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || executor.started() == 1).await);
    let second = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h1"]))
        .await
        .unwrap();

    manager.cancel_job(first.job_id).await.unwrap();
    executor.release(1);
    let first = manager.await_terminal(first.job_id).await.unwrap();
    assert_eq!(first.status, JobState::Cancelled);

    assert!(wait_until(WAIT, || executor.started() == 2).await);
    executor.open_gate();
    let second = tokio::time::timeout(WAIT, manager.await_terminal(second.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.status, JobState::Completed);

    system.shutdown(WAIT).await.unwrap();
}
