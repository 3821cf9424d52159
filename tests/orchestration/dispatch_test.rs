//! # Dispatch Scheduling Tests
//!
//! Worker slot limits and host-level mutual exclusion between jobs.

use crate::common::{started_system, WAIT};
use fleet_core::config::FleetConfig;
use fleet_core::models::JobRequest;
use fleet_core::planner::ExecutionMode;
use fleet_core::test_utils::{
    test_config, test_manager, wait_for_status, wait_until, ScriptedExecutor,
};
use fleet_core::JobState;
use std::sync::Arc;
use std::time::Duration;

fn config_with_slots(max_concurrent_jobs: usize) -> FleetConfig {
    FleetConfig {
        max_concurrent_jobs,
        ..test_config()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_jobs_never_exceed_worker_slots() {
    let executor = ScriptedExecutor::new().with_delay(Duration::from_millis(20));
    let (manager, executor, system) = started_system(config_with_slots(2), executor).await;

    let mut jobs = Vec::new();
    for i in 0..6 {
        let job = manager
            .create_job(JobRequest::new(["api"], "staging").with_hosts([format!("h{i}")]))
            .await
            .unwrap();
        jobs.push(job.job_id);
    }

    for job_id in &jobs {
        let finished = tokio::time::timeout(WAIT, manager.await_terminal(*job_id))
            .await
            .expect("job finishes in time")
            .unwrap();
        assert_eq!(finished.status, JobState::Completed);
    }

    assert!(executor.max_in_flight() <= 2);
    assert_eq!(executor.started(), 12);
    assert!(!executor.host_overlap_detected());

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_hosts_wait_for_the_holder() {
    let executor = ScriptedExecutor::new().gated();
    let (manager, executor, system) = started_system(config_with_slots(3), executor).await;

    let first = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h1", "h2"]))
        .await
        .unwrap();
    assert!(wait_for_status(&manager, first.job_id, JobState::Running, WAIT)
        .await
        .is_some());

    let second = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h2"]))
        .await
        .unwrap();
    let disjoint = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h3"]))
        .await
        .unwrap();
    assert!(wait_for_status(&manager, disjoint.job_id, JobState::Running, WAIT)
        .await
        .is_some());

    // A free slot is not enough while h2 is held
    let report = manager.dispatch_cycle().await.unwrap();
    assert!(report.dispatched.is_empty());
    assert_eq!(report.waiting_on_hosts, 1);
    assert_eq!(
        manager.get_job(second.job_id).await.unwrap().status,
        JobState::Queued
    );

    executor.open_gate();
    let first = manager.await_terminal(first.job_id).await.unwrap();
    let second = tokio::time::timeout(WAIT, manager.await_terminal(second.job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.status, JobState::Completed);
    assert!(second.started_at >= first.finished_at);
    assert!(!executor.host_overlap_detected());

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_younger_job_cannot_overtake_on_shared_host() {
    let executor = ScriptedExecutor::new().gated();
    let (manager, executor, system) = started_system(config_with_slots(4), executor).await;

    let holder = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h1"]))
        .await
        .unwrap();
    assert!(wait_for_status(&manager, holder.job_id, JobState::Running, WAIT)
        .await
        .is_some());

    // Blocked on h1, and in turn blocks h2 for anything younger
    let older = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h1", "h2"]))
        .await
        .unwrap();
    let younger = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h2"]))
        .await
        .unwrap();
    let unrelated = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h9"]))
        .await
        .unwrap();

    assert!(
        wait_for_status(&manager, unrelated.job_id, JobState::Running, WAIT)
            .await
            .is_some()
    );
    let report = manager.dispatch_cycle().await.unwrap();
    assert_eq!(report.waiting_on_hosts, 2);
    assert_eq!(
        manager.get_job(younger.job_id).await.unwrap().status,
        JobState::Queued
    );

    executor.open_gate();
    let older = tokio::time::timeout(WAIT, manager.await_terminal(older.job_id))
        .await
        .unwrap()
        .unwrap();
    let younger = tokio::time::timeout(WAIT, manager.await_terminal(younger.job_id))
        .await
        .unwrap()
        .unwrap();

    assert!(younger.started_at >= older.finished_at);
    assert!(!executor.host_overlap_detected());

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_without_hosts_excludes_everything() {
    let executor = ScriptedExecutor::new().gated();
    let (manager, executor, system) = started_system(config_with_slots(3), executor).await;

    let fleet_wide = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    assert!(wait_for_status(&manager, fleet_wide.job_id, JobState::Running, WAIT)
        .await
        .is_some());

    let targeted = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h5"]))
        .await
        .unwrap();
    let report = manager.dispatch_cycle().await.unwrap();
    assert_eq!(report.waiting_on_hosts, 1);

    executor.open_gate();
    let targeted = tokio::time::timeout(WAIT, manager.await_terminal(targeted.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(targeted.status, JobState::Completed);
    assert!(!executor.host_overlap_detected());

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_dry_run_waits_for_its_hosts_and_takes_a_slot() {
    let executor = Arc::new(ScriptedExecutor::new().gated());
    let manager = test_manager(config_with_slots(2), executor.clone());

    let holder = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h1"]))
        .await
        .unwrap();
    let dry = manager
        .create_job(
            JobRequest::new(["python"], "staging")
                .with_hosts(["h1"])
                .with_mode(ExecutionMode::DryRun),
        )
        .await
        .unwrap();
    let other = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h7"]))
        .await
        .unwrap();
    let later = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h8"]))
        .await
        .unwrap();

    let report = manager.dispatch_cycle().await.unwrap();
    assert_eq!(report.dispatched, vec![holder.job_id, other.job_id]);
    assert_eq!(report.waiting_on_hosts, 1);
    assert_eq!(report.waiting_on_capacity, 1);
    assert_eq!(
        manager.get_job(dry.job_id).await.unwrap().status,
        JobState::Queued
    );

    executor.open_gate();
    for job_id in [holder.job_id, other.job_id] {
        let job = tokio::time::timeout(Duration::from_secs(5), manager.await_terminal(job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobState::Completed);
    }
    assert!(wait_until(Duration::from_secs(5), || manager.running_count() == 0).await);

    // h1 is free again; the dry run goes first and holds a slot like any job
    let report = manager.dispatch_cycle().await.unwrap();
    assert_eq!(report.dispatched, vec![dry.job_id, later.job_id]);

    let dry = tokio::time::timeout(Duration::from_secs(5), manager.await_terminal(dry.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dry.status, JobState::Completed);
    assert!(dry.started_at >= manager.get_job(holder.job_id).await.unwrap().finished_at);
    assert!(executor.components_for(dry.job_id).is_empty());

    let later = manager.await_terminal(later.job_id).await.unwrap();
    assert_eq!(later.status, JobState::Completed);
    assert!(!executor.host_overlap_detected());
}
