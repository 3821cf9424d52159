//! # Bootstrap and Restart Tests
//!
//! System start-up, health, shutdown, and what a restarted orchestrator finds
//! in a persistent store.

use crate::common::{default_system, WAIT};
use fleet_core::config::{ConfigManager, FleetConfig};
use fleet_core::constants::HealthStatus;
use fleet_core::models::JobRequest;
use fleet_core::orchestration::{JobManager, OrchestrationSystem};
use fleet_core::test_utils::{fixture_catalog, test_config, wait_until, ScriptedExecutor};
use fleet_core::JobState;
use std::sync::Arc;

#[tokio::test]
async fn test_health_reports_running_loops() {
    let (manager, _executor, system) = default_system(ScriptedExecutor::new()).await;
    assert!(system.is_running());
    assert!(system.config_manager().is_none());

    let health = system.health().await.unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.dispatcher_alive);
    assert!(health.sweeper_alive);
    assert_eq!(health.queued, 0);
    assert_eq!(health.running, 0);
    assert_eq!(health.max_concurrent_jobs, 2);

    let job = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    manager.await_terminal(job.job_id).await.unwrap();

    tokio::time::timeout(WAIT, system.shutdown(WAIT))
        .await
        .expect("shutdown completes")
        .unwrap();
}

#[tokio::test]
async fn test_queued_jobs_wait_for_start() {
    let executor = Arc::new(ScriptedExecutor::new());
    let manager = JobManager::in_memory(test_config(), fixture_catalog(), executor.clone());

    let job = manager
        .create_job(JobRequest::new(["python"], "staging"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(executor.started(), 0);

    let system = OrchestrationSystem::start(manager.clone()).await.unwrap();
    let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobState::Completed);

    system.shutdown(WAIT).await.unwrap();
}

#[cfg(feature = "sqlite")]
mod persistent {
    use super::*;
    use fleet_core::constants::system::ORPHANED_JOB_REASON;
    use fleet_core::SqliteJobStore;

    fn database_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}", dir.path().join("fleet.db").display())
    }

    async fn sqlite_manager(url: &str, executor: Arc<ScriptedExecutor>) -> Arc<JobManager> {
        let store = SqliteJobStore::connect(url).await.unwrap();
        JobManager::new(test_config(), fixture_catalog(), Arc::new(store), executor)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_fails_orphaned_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir);

        let stuck = Arc::new(ScriptedExecutor::new().gated());
        let before = sqlite_manager(&url, stuck.clone()).await;
        let job = before
            .create_job(JobRequest::new(["tracker"], "staging"))
            .await
            .unwrap();
        before.dispatch_cycle().await.unwrap();
        assert!(wait_until(WAIT, || stuck.started() == 1).await);

        let deadline = tokio::time::Instant::now() + WAIT;
        while before.store().logs(job.job_id, 0).await.unwrap().len() < 3 {
            assert!(tokio::time::Instant::now() < deadline, "step line persisted");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // A second process on the same database; nothing runs the job there
        let after = sqlite_manager(&url, Arc::new(ScriptedExecutor::new())).await;
        assert_eq!(
            after.get_job(job.job_id).await.unwrap().status,
            JobState::Running
        );
        let system = OrchestrationSystem::start(after.clone()).await.unwrap();

        let recovered = after.get_job(job.job_id).await.unwrap();
        assert_eq!(recovered.status, JobState::Failed);
        assert_eq!(
            recovered.message,
            format!("Deployment failed: {ORPHANED_JOB_REASON}")
        );

        let lines = after.logs(job.job_id, 0).await.unwrap();
        assert!(lines[0].line.starts_with("Job created"));
        assert_eq!(lines.last().map(|l| &l.line), Some(&recovered.message));
        let replay = after.subscribe(job.job_id).await.unwrap().collect_lines().await;
        assert_eq!(replay, lines);

        system.shutdown(WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_jobs_and_logs_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir);

        let executor = Arc::new(ScriptedExecutor::new().with_output_lines(1));
        let first_run = sqlite_manager(&url, executor).await;
        let system = OrchestrationSystem::start(first_run.clone()).await.unwrap();
        let job = first_run
            .create_job(JobRequest::new(["api"], "production").with_owner("ops"))
            .await
            .unwrap();
        let finished = tokio::time::timeout(WAIT, first_run.await_terminal(job.job_id))
            .await
            .unwrap()
            .unwrap();
        let original: Vec<String> = first_run
            .logs(job.job_id, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.line)
            .collect();
        system.shutdown(WAIT).await.unwrap();

        let second_run = sqlite_manager(&url, Arc::new(ScriptedExecutor::new())).await;
        let reloaded = second_run.get_job(job.job_id).await.unwrap();
        assert_eq!(reloaded.status, JobState::Completed);
        assert_eq!(reloaded.owner.as_deref(), Some("ops"));
        assert_eq!(reloaded.outcome, finished.outcome);

        let replayed: Vec<String> = second_run
            .logs(job.job_id, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.line)
            .collect();
        assert_eq!(replayed, original);
    }

    #[tokio::test]
    async fn test_bootstrap_uses_configured_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = FleetConfig {
            database_url: Some(database_url(&dir)),
            ..test_config()
        };
        let config_manager = ConfigManager::from_config(config).unwrap();

        let system = OrchestrationSystem::bootstrap(
            config_manager,
            fixture_catalog(),
            Arc::new(ScriptedExecutor::new()),
        )
        .await
        .unwrap();
        assert!(system.config_manager().is_some());

        let manager = Arc::clone(system.manager());
        let job = manager
            .create_job(JobRequest::new(["python"], "staging"))
            .await
            .unwrap();
        let finished = tokio::time::timeout(WAIT, manager.await_terminal(job.job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, JobState::Completed);
        assert!(dir.path().join("fleet.db").exists());

        system.shutdown(WAIT).await.unwrap();
    }
}
