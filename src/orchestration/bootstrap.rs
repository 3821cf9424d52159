//! # Orchestration Bootstrap
//!
//! Starts the two background loops around a [`JobManager`] and hands back a
//! handle for health checks and shutdown.
//!
//! - **dispatcher**: runs a dispatch cycle whenever it is woken (job created,
//!   cancelled or finished) and at least every `dispatch_interval_ms`
//! - **sweeper**: runs the timeout and cleanup sweeps every
//!   `sweep_interval_seconds`
//!
//! Before either loop starts, jobs a previous process left `running` are
//! failed so their hosts become available again.

use super::job_manager::JobManager;
use super::types::SystemHealth;
use crate::catalog::ComponentCatalog;
use crate::config::{ConfigManager, FleetConfig};
use crate::constants::HealthStatus;
use crate::error::Result;
use crate::executor::Executor;
use crate::state_machine::JobState;
use crate::store::{InMemoryJobStore, JobStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Handle to a started orchestration system
pub struct OrchestrationSystem {
    manager: Arc<JobManager>,
    config_manager: Option<Arc<ConfigManager>>,
    shutdown_sender: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    started_at: Instant,
}

impl std::fmt::Debug for OrchestrationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationSystem")
            .field("manager", &self.manager)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl OrchestrationSystem {
    /// Recover orphaned jobs, then start the dispatcher and sweeper loops
    pub async fn start(manager: Arc<JobManager>) -> Result<Self> {
        let recovered = manager.recover_orphans().await?;
        if !recovered.is_empty() {
            warn!(
                count = recovered.len(),
                "🚀 BOOTSTRAP: Failed jobs orphaned by a previous run"
            );
        }

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatcher_loop(
            Arc::clone(&manager),
            shutdown_receiver.clone(),
        ));
        let sweeper = tokio::spawn(sweeper_loop(Arc::clone(&manager), shutdown_receiver));

        info!(
            max_concurrent_jobs = manager.config().max_concurrent_jobs,
            job_timeout_minutes = manager.config().job_timeout_minutes,
            executor = manager.executor_name(),
            "🚀 BOOTSTRAP: Orchestration system started"
        );

        // Pick up jobs queued before this start
        manager.notify_dispatcher();

        Ok(Self {
            manager,
            config_manager: None,
            shutdown_sender,
            dispatcher,
            sweeper,
            started_at: Instant::now(),
        })
    }

    /// Build the store named by the configuration and start a system on it
    pub async fn bootstrap(
        config_manager: Arc<ConfigManager>,
        catalog: ComponentCatalog,
        executor: Arc<dyn Executor>,
    ) -> Result<Self> {
        let config = config_manager.config().clone();
        let store = Self::build_store(&config).await?;
        let manager = JobManager::new(config, catalog, store, executor);

        let mut system = Self::start(manager).await?;
        info!(
            environment = %config_manager.environment(),
            "🚀 BOOTSTRAP: Configuration environment"
        );
        system.config_manager = Some(config_manager);
        Ok(system)
    }

    /// SQLite when `database_url` is set, otherwise in memory
    pub async fn build_store(config: &FleetConfig) -> Result<Arc<dyn JobStore>> {
        match config.database_url.as_deref() {
            None => Ok(Arc::new(InMemoryJobStore::new())),
            #[cfg(feature = "sqlite")]
            Some(url) => {
                let store = crate::store::SqliteJobStore::connect(url).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            Some(url) => Err(crate::config::ConfigurationError::invalid_value(
                "database_url",
                url,
                "persistent storage requires the `sqlite` feature",
            )
            .into()),
        }
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub fn config_manager(&self) -> Option<&Arc<ConfigManager>> {
        self.config_manager.as_ref()
    }

    /// Whether shutdown has not been requested
    pub fn is_running(&self) -> bool {
        !*self.shutdown_sender.borrow()
    }

    pub async fn health(&self) -> Result<SystemHealth> {
        let dispatcher_alive = !self.dispatcher.is_finished();
        let sweeper_alive = !self.sweeper.is_finished();
        let status = if !self.is_running() {
            HealthStatus::Stopped
        } else if dispatcher_alive && sweeper_alive {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        let store = self.manager.store();
        let queued = store.jobs_with_status(JobState::Queued).await?.len();
        let running = store.jobs_with_status(JobState::Running).await?.len();

        Ok(SystemHealth {
            status,
            dispatcher_alive,
            sweeper_alive,
            queued,
            running,
            max_concurrent_jobs: self.manager.config().max_concurrent_jobs,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        })
    }

    /// Stop both loops, waiting up to `timeout` for them to exit.
    ///
    /// Jobs already running keep their workers and finish on the runtime.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        if self.shutdown_sender.send(true).is_err() {
            warn!("🛑 SHUTDOWN: Background loops already gone");
        }
        info!("🛑 SHUTDOWN: Orchestration system shutdown requested");

        for (name, handle) in [("dispatcher", self.dispatcher), ("sweeper", self.sweeper)] {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(loop_name = name, error = %e, "🛑 SHUTDOWN: Loop ended abnormally")
                }
                Err(_) => {
                    warn!(
                        loop_name = name,
                        "🛑 SHUTDOWN: Loop did not stop in time; aborting"
                    );
                    abort.abort();
                }
            }
        }

        info!("🛑 SHUTDOWN: Orchestration system stopped");
        Ok(())
    }
}

async fn dispatcher_loop(manager: Arc<JobManager>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(manager.config().dispatch_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = manager.dispatch_requested() => {}
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        match manager.dispatch_cycle().await {
            Ok(report) if !report.is_idle() => {
                crate::log_dispatch!(debug, "dispatch_cycle",
                    dispatched: report.dispatched.len(),
                    waiting_on_hosts: report.waiting_on_hosts,
                    waiting_on_capacity: report.waiting_on_capacity
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "🚦 DISPATCH: Dispatch cycle failed"),
        }
    }

    info!("🚦 DISPATCH: Dispatcher stopped");
}

async fn sweeper_loop(manager: Arc<JobManager>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(manager.config().sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = manager.sweep().await {
            error!(error = %e, "🧹 SWEEP: Sweep failed");
        }
    }

    info!("🧹 SWEEP: Sweeper stopped");
}
