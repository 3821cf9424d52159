//! # Sweep Tests
//!
//! Timeouts and retention cleanup, driven with explicit clocks.

use crate::common::WAIT;
use chrono::{Duration, Utc};
use fleet_core::config::FleetConfig;
use fleet_core::models::JobRequest;
use fleet_core::test_utils::{test_config, test_manager, wait_until, ScriptedExecutor};
use fleet_core::{FleetError, JobState};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_fails_running_job_and_stops_worker() {
    let executor = Arc::new(ScriptedExecutor::new().gated());
    let manager = test_manager(test_config(), executor.clone());

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging"))
        .await
        .unwrap();
    manager.dispatch_cycle().await.unwrap();
    assert!(wait_until(WAIT, || executor.started() == 1).await);

    // Not due yet
    assert!(manager.sweep_timeouts_at(Utc::now()).await.unwrap().is_empty());

    let timed_out = manager
        .sweep_timeouts_at(Utc::now() + Duration::minutes(61))
        .await
        .unwrap();
    assert_eq!(timed_out, vec![job.job_id]);

    let failed = manager.get_job(job.job_id).await.unwrap();
    assert_eq!(failed.status, JobState::Failed);
    assert_eq!(failed.message, "Deployment failed: timed out after 60 minutes");

    // The log ends with the timeout even though the step is still in flight
    let ended = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ended.status, JobState::Failed);
    let lines = manager.logs(job.job_id, 0).await.unwrap();
    assert_eq!(
        lines.last().map(|l| l.line.as_str()),
        Some(failed.message.as_str())
    );

    // The worker finishes its step, then stops without overwriting the failure
    executor.open_gate();
    assert!(wait_until(WAIT, || manager.running_count() == 0).await);
    assert_eq!(executor.components_for(job.job_id), vec!["python"]);
    let after = manager.get_job(job.job_id).await.unwrap();
    assert_eq!(after.status, JobState::Failed);
    assert_eq!(after.message, failed.message);

    // Already failed; a second sweep finds nothing
    assert!(manager
        .sweep_timeouts_at(Utc::now() + Duration::minutes(120))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_queued_jobs_never_time_out() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));
    let job = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();

    let timed_out = manager
        .sweep_timeouts_at(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    assert!(timed_out.is_empty());
    assert_eq!(
        manager.get_job(job.job_id).await.unwrap().status,
        JobState::Queued
    );
}

#[tokio::test]
async fn test_cleanup_removes_only_expired_terminal_jobs() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));

    let finished = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    manager.cancel_job(finished.job_id).await.unwrap();
    let queued = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();

    // Inside the retention window
    assert!(manager
        .cleanup_expired_at(Utc::now())
        .await
        .unwrap()
        .is_empty());

    let report = manager
        .sweep_at(Utc::now() + Duration::days(8))
        .await
        .unwrap();
    assert_eq!(report.cleaned_up, vec![finished.job_id]);
    assert!(report.timed_out.is_empty());

    assert!(matches!(
        manager.get_job(finished.job_id).await,
        Err(FleetError::NotFound { .. })
    ));
    assert!(matches!(
        manager.logs(finished.job_id, 0).await,
        Err(FleetError::NotFound { .. })
    ));
    assert_eq!(
        manager.get_job(queued.job_id).await.unwrap().status,
        JobState::Queued
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unbounded_timeout_and_retention_never_expire() {
    let config = FleetConfig {
        // Both fit a TimeDelta but land outside the calendar range
        job_timeout_minutes: 1_000_000_000_000,
        log_retention_days: 1_000_000_000,
        ..test_config()
    };
    assert!(config.validate().is_ok());

    let executor = Arc::new(ScriptedExecutor::new().gated());
    let manager = test_manager(config, executor.clone());

    let running = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    manager.dispatch_cycle().await.unwrap();
    assert!(wait_until(WAIT, || executor.started() == 1).await);

    let finished = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    manager.cancel_job(finished.job_id).await.unwrap();

    let report = manager
        .sweep_at(Utc::now() + Duration::days(365 * 1000))
        .await
        .unwrap();
    assert!(report.timed_out.is_empty());
    assert!(report.cleaned_up.is_empty());
    assert_eq!(
        manager.get_job(running.job_id).await.unwrap().status,
        JobState::Running
    );
    assert_eq!(
        manager.get_job(finished.job_id).await.unwrap().status,
        JobState::Cancelled
    );

    executor.open_gate();
    let done = tokio::time::timeout(WAIT, manager.await_terminal(running.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobState::Completed);
}
