//! # Job Lifecycle Integration Tests
//!
//! Create, run and inspect jobs end to end: step order, failure handling,
//! dry runs, log access and listing.

use crate::common::{default_system, WAIT};
use fleet_core::constants::events;
use fleet_core::models::{JobFilter, JobRequest, StepStatus};
use fleet_core::planner::ExecutionMode;
use fleet_core::test_utils::{test_config, test_manager, ScriptedExecutor, StepBehavior};
use fleet_core::{FleetError, JobState, LogEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_job_runs_steps_in_dependency_order() {
    let (manager, executor, system) = default_system(ScriptedExecutor::new()).await;

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging").with_hosts(["h1"]))
        .await
        .expect("job created");
    assert_eq!(job.status, JobState::Queued);
    assert_eq!(job.plan.component_names(), vec!["python", "api", "tracker"]);

    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .expect("job finishes in time")
        .unwrap();

    assert_eq!(finished.status, JobState::Completed);
    assert_eq!(finished.message, "Deployment completed successfully");
    assert!(finished.started_at.is_some());
    assert!(finished.finished_at >= finished.started_at);
    assert_eq!(
        executor.components_for(job.job_id),
        vec!["python", "api", "tracker"]
    );

    let outcome = finished.outcome.expect("outcome recorded");
    assert!(outcome
        .steps
        .iter()
        .all(|step| step.status == StepStatus::Succeeded));
    assert!(outcome.failed_step.is_none());

    for step in executor.executed() {
        assert_eq!(step.hosts, vec!["h1"]);
        assert_eq!(step.mode, ExecutionMode::Normal);
    }

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_pushed_and_pulled_logs_agree() {
    let (manager, _executor, system) =
        default_system(ScriptedExecutor::new().with_output_lines(2)).await;

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging"))
        .await
        .unwrap();

    let subscription = manager.subscribe(job.job_id).await.unwrap();
    let pushed = tokio::time::timeout(WAIT, subscription.collect_lines())
        .await
        .expect("log stream ends");
    let pulled = manager.logs(job.job_id, 0).await.unwrap();

    assert_eq!(pushed, pulled);
    for (expected, line) in pulled.iter().enumerate() {
        assert_eq!(line.offset, expected as u64);
    }
    assert!(pulled[0].line.starts_with("Job created: 3 step(s)"));
    assert!(pulled.iter().any(|l| l.line == "python: output line 2"));
    assert_eq!(
        pulled.last().map(|l| l.line.as_str()),
        Some("Deployment completed successfully")
    );

    // Offset reads return the tail
    let tail = manager.logs(job.job_id, 3).await.unwrap();
    assert_eq!(tail.as_slice(), &pulled[3..]);
    assert!(manager
        .logs(job.job_id, pulled.len() as u64)
        .await
        .unwrap()
        .is_empty());

    // A late subscriber gets the backlog and the end marker
    let mut late = manager.subscribe(job.job_id).await.unwrap();
    let mut replayed = 0;
    loop {
        match late.next().await {
            Some(LogEvent::Line(_)) => replayed += 1,
            Some(LogEvent::End) => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(replayed, pulled.len());
    assert!(late.next().await.is_none());

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_failed_step_skips_remaining_steps() {
    let executor =
        ScriptedExecutor::new().with_behavior("api", StepBehavior::Fail("port in use".into()));
    let (manager, executor, system) = default_system(executor).await;

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging"))
        .await
        .unwrap();
    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobState::Failed);
    assert!(finished.message.contains("step 'api' failed: port in use"));
    assert_eq!(executor.components_for(job.job_id), vec!["python", "api"]);

    let outcome = finished.outcome.unwrap();
    assert_eq!(outcome.failed_step.as_deref(), Some("api"));
    let statuses: Vec<StepStatus> = outcome.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Skipped]
    );
    assert_eq!(outcome.steps[1].exit_code, Some(2));

    let lines = manager.logs(job.job_id, 0).await.unwrap();
    assert!(lines.iter().any(|l| l.line == "- tracker skipped"));

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_continue_on_error_runs_every_step() {
    let executor =
        ScriptedExecutor::new().with_behavior("api", StepBehavior::Fail("flaky".into()));
    let (manager, executor, system) = default_system(executor).await;

    let job = manager
        .create_job(
            JobRequest::new(["tracker"], "staging")
                .with_options(json!({ "continue_on_error": true })),
        )
        .await
        .unwrap();
    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobState::Failed);
    assert_eq!(
        executor.components_for(job.job_id),
        vec!["python", "api", "tracker"]
    );
    let outcome = finished.outcome.unwrap();
    assert_eq!(outcome.failed_step.as_deref(), Some("api"));
    assert_eq!(outcome.failed_steps().count(), 1);
    assert_eq!(outcome.steps[2].status, StepStatus::Succeeded);

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_executor_error_is_logged_and_fails_job() {
    let executor = ScriptedExecutor::new()
        .with_behavior("python", StepBehavior::Error("ssh unreachable".into()));
    let (manager, _executor, system) = default_system(executor).await;

    let job = manager
        .create_job(JobRequest::new(["api"], "staging"))
        .await
        .unwrap();
    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobState::Failed);
    let lines = manager.logs(job.job_id, 0).await.unwrap();
    assert!(lines
        .iter()
        .any(|l| l.line == "executor error: running python: ssh unreachable"));

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_dry_run_never_calls_executor() {
    let (manager, executor, system) = default_system(ScriptedExecutor::new()).await;

    let job = manager
        .create_job(JobRequest::new(["tracker"], "staging").with_mode(ExecutionMode::DryRun))
        .await
        .unwrap();
    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobState::Completed);
    assert_eq!(executor.started(), 0);
    let outcome = finished.outcome.unwrap();
    assert!(outcome
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Skipped && s.message.as_deref() == Some("dry run")));

    let lines = manager.logs(job.job_id, 0).await.unwrap();
    assert!(lines.iter().any(|l| l.line.starts_with("Plan (dry_run)")));

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_check_mode_is_passed_to_executor() {
    let (manager, executor, system) = default_system(ScriptedExecutor::new()).await;

    let job = manager
        .create_job(JobRequest::new(["python"], "staging").with_mode(ExecutionMode::Check))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();

    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].mode, ExecutionMode::Check);

    system.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_rejected_requests_create_no_job() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));

    let conflict = manager
        .create_job(JobRequest::new(["api", "legacy-api"], "staging"))
        .await
        .unwrap_err();
    assert!(matches!(conflict, FleetError::Validation(_)));

    let unknown = manager
        .create_job(JobRequest::new(["nope"], "staging"))
        .await
        .unwrap_err();
    assert!(matches!(unknown, FleetError::Resolution(_)));

    let environment = manager
        .create_job(JobRequest::new(["python"], "moon"))
        .await
        .unwrap_err();
    assert!(matches!(environment, FleetError::InvalidRequest { .. }));

    let platform = manager
        .create_job(JobRequest::new(["python"], "staging").with_platform("universal"))
        .await
        .unwrap_err();
    assert!(matches!(platform, FleetError::InvalidRequest { .. }));

    let options = manager
        .create_job(JobRequest::new(["python"], "staging").with_options(json!([1, 2])))
        .await
        .unwrap_err();
    assert!(options.is_validation());

    let page = manager.list_jobs(1, 20, JobFilter::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_list_jobs_pages_newest_first() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));

    let mut created = Vec::new();
    for owner in ["alice", "bob", "alice"] {
        let job = manager
            .create_job(JobRequest::new(["python"], "staging").with_owner(owner))
            .await
            .unwrap();
        created.push(job.job_id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = manager.list_jobs(1, 2, JobFilter::default()).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.total_pages(), 2);
    assert_eq!(first.jobs.len(), 2);
    assert_eq!(first.jobs[0].job_id, created[2]);

    let second = manager.list_jobs(2, 2, JobFilter::default()).await.unwrap();
    assert_eq!(second.jobs.len(), 1);
    assert_eq!(second.jobs[0].job_id, created[0]);

    let alice = manager
        .list_jobs(1, 20, JobFilter::default().with_owner("alice"))
        .await
        .unwrap();
    assert_eq!(alice.total, 2);

    let running = manager
        .list_jobs(1, 20, JobFilter::default().with_status(JobState::Running))
        .await
        .unwrap();
    assert_eq!(running.total, 0);

    assert!(manager.list_jobs(0, 20, JobFilter::default()).await.is_err());
    assert!(manager.list_jobs(1, 0, JobFilter::default()).await.is_err());
    assert!(manager.list_jobs(1, 101, JobFilter::default()).await.is_err());

    let stats = manager.statistics().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status.get(&JobState::Queued), Some(&3));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));
    let missing = Uuid::new_v4();

    assert!(matches!(
        manager.get_job(missing).await,
        Err(FleetError::NotFound { job_id }) if job_id == missing
    ));
    assert!(matches!(
        manager.logs(missing, 0).await,
        Err(FleetError::NotFound { .. })
    ));
    assert!(matches!(
        manager.cancel_job(missing).await,
        Err(FleetError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_preview_warns_about_busy_hosts() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));
    let queued = manager
        .create_job(JobRequest::new(["python"], "staging").with_hosts(["h1", "h2"]))
        .await
        .unwrap();

    let preview = manager
        .preview(JobRequest::new(["tracker"], "staging").with_hosts(["h2", "h3"]))
        .await
        .unwrap();
    assert_eq!(preview.resolved_components, vec!["python", "api", "tracker"]);
    assert_eq!(
        preview.resources.ports.iter().copied().collect::<Vec<_>>(),
        vec![8080, 9090]
    );
    assert_eq!(preview.warnings.len(), 1);
    assert!(preview.warnings[0].starts_with("h2 targeted by queued job"));
    assert!(preview.warnings[0].contains(&queued.job_id.to_string()));

    let everywhere = manager
        .preview(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    assert!(everywhere
        .warnings
        .iter()
        .any(|w| w.starts_with("no target hosts")));

    // Previews never create jobs
    let page = manager.list_jobs(1, 20, JobFilter::default()).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_lifecycle_events_follow_the_run() {
    let manager = test_manager(test_config(), Arc::new(ScriptedExecutor::new()));
    let mut events_rx = manager.lifecycle_events();

    let job = manager
        .create_job(JobRequest::new(["api"], "staging"))
        .await
        .unwrap();
    let report = manager.dispatch_cycle().await.unwrap();
    assert_eq!(report.dispatched, vec![job.job_id]);

    let mut names = Vec::new();
    let collected = tokio::time::timeout(WAIT, async {
        while let Ok(event) = events_rx.recv().await {
            assert_eq!(event.job_id, job.job_id);
            names.push(event.name);
            if event.name == events::JOB_COMPLETED {
                break;
            }
        }
    })
    .await;
    assert!(collected.is_ok());

    assert_eq!(
        names,
        vec![
            events::JOB_CREATED,
            events::JOB_STARTED,
            events::STEP_STARTED,
            events::STEP_COMPLETED,
            events::STEP_STARTED,
            events::STEP_COMPLETED,
            events::JOB_COMPLETED,
        ]
    );
}
