//! # Job Manager
//!
//! Single owner of job lifecycle. Callers create, inspect, cancel and follow
//! jobs here; the dispatcher, the workers and the sweeps are implemented as
//! further `impl JobManager` blocks in sibling modules so they share the same
//! state without any ambient globals.
//!
//! ## Shared state
//!
//! - the [`JobStore`]: authoritative job records and persisted log lines, with
//!   atomic per-job transitions
//! - the [`LogHub`]: live per-job logs for pull and push readers
//! - cancellation flags and host reservations for running jobs
//! - a semaphore holding one permit per worker slot
//!
//! Every status change goes through [`JobStore::transition`] with an expected
//! source state, so two actors racing on the same job (a cancel request and
//! the dispatcher, a worker and the timeout sweep) resolve to exactly one
//! winner.

use super::types::HostClaim;
use crate::catalog::{ComponentCatalog, ComponentListing, UNIVERSAL_PLATFORM};
use crate::config::FleetConfig;
use crate::constants::events;
use crate::error::{FleetError, Result};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::executor::Executor;
use crate::logs::{JobLog, LogHub, LogLine, LogSubscription};
use crate::models::{Job, JobFilter, JobPage, JobRequest, JobStatistics};
use crate::planner::{ExecutionPlan, ExecutionPlanner, PlanPreview};
use crate::resolver::DependencyResolver;
use crate::state_machine::{JobEvent, JobState};
use crate::store::{InMemoryJobStore, JobStore, StoreError, Transition};
use crate::validation::{
    validate_environment, validate_options_payload, validate_target_hosts,
    CompatibilityValidator, ResourceTotals,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify, Semaphore};
use tracing::warn;
use uuid::Uuid;

/// Largest page `list_jobs` will return
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct JobManager {
    pub(super) config: FleetConfig,
    pub(super) catalog: ComponentCatalog,
    pub(super) store: Arc<dyn JobStore>,
    pub(super) executor: Arc<dyn Executor>,
    pub(super) logs: LogHub,
    pub(super) events: EventPublisher,
    /// Cooperative cancellation flag per running job
    pub(super) cancellations: DashMap<Uuid, Arc<AtomicBool>>,
    /// Hosts held by running jobs
    pub(super) reservations: parking_lot::Mutex<HashMap<Uuid, HostClaim>>,
    pub(super) slots: Arc<Semaphore>,
    pub(super) dispatch_signal: Notify,
    /// Serializes dispatch cycles
    pub(super) dispatch_lock: Mutex<()>,
}

// Manual Debug implementation because the executor is a trait object
impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("max_concurrent_jobs", &self.config.max_concurrent_jobs)
            .field("executor", &self.executor.name())
            .field("store", &self.store)
            .field("running", &self.cancellations.len())
            .finish_non_exhaustive()
    }
}

struct PreparedRequest {
    plan: ExecutionPlan,
    totals: ResourceTotals,
}

impl JobManager {
    pub fn new(
        config: FleetConfig,
        catalog: ComponentCatalog,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            logs: LogHub::new(config.log_subscriber_buffer),
            slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            catalog,
            store,
            executor,
            events: EventPublisher::default(),
            cancellations: DashMap::new(),
            reservations: parking_lot::Mutex::new(HashMap::new()),
            dispatch_signal: Notify::new(),
            dispatch_lock: Mutex::new(()),
        })
    }

    /// Manager backed by a fresh [`InMemoryJobStore`]
    pub fn in_memory(
        config: FleetConfig,
        catalog: ComponentCatalog,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        Self::new(config, catalog, Arc::new(InMemoryJobStore::new()), executor)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Subscribe to job lifecycle events
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Number of jobs this process is currently running
    pub fn running_count(&self) -> usize {
        self.cancellations.len()
    }

    /// Validate, resolve and plan a request, then queue it as a new job.
    ///
    /// Returns as soon as the job is stored; execution happens on the
    /// dispatcher's schedule. Validation failures never create a job.
    pub async fn create_job(&self, request: JobRequest) -> Result<Job> {
        let prepared = self.prepare(&request)?;
        let JobRequest {
            components,
            environment,
            target_hosts,
            options,
            owner,
            ..
        } = request;

        let job = Job::new(
            environment,
            components,
            prepared.plan,
            target_hosts,
            options,
            owner,
            Utc::now(),
        );
        let job_id = job.job_id;

        // The first line is appended before the job becomes visible to the
        // dispatcher so it always holds offset 0
        let log = self.logs.open(job_id);
        let created = log.append(format!(
            "Job created: {} step(s) for platform {} in {} ({}), estimated {}",
            job.plan.len(),
            job.platform,
            job.environment,
            job.execution_mode,
            job.plan.estimate
        ));

        if let Err(e) = self.store.insert(&job).await {
            self.logs.remove(job_id);
            return Err(e.into());
        }
        if let Some(line) = created {
            self.persist_line(job_id, &line).await;
        }

        crate::log_job!(info, "job_created",
            job_id: job_id,
            environment: job.environment,
            platform: job.platform,
            mode: job.execution_mode.as_str(),
            steps: job.plan.len(),
            hosts: job.target_hosts.len()
        );
        self.events.publish(
            events::JOB_CREATED,
            job_id,
            job.status,
            json!({
                "environment": job.environment,
                "components": job.plan.component_names(),
                "mode": job.execution_mode,
            }),
        );
        self.dispatch_signal.notify_one();

        Ok(job)
    }

    /// Run every pre-flight check and return the plan without creating a job
    pub async fn preview(&self, request: JobRequest) -> Result<PlanPreview> {
        let prepared = self.prepare(&request)?;
        let mut warnings = Vec::new();

        if request.target_hosts.is_empty() {
            warnings.push("no target hosts given; every eligible host is targeted".to_string());
        }

        let claim = HostClaim::for_job_request(&request);
        for status in [JobState::Running, JobState::Queued] {
            for job in self.store.jobs_with_status(status).await? {
                let other = HostClaim::for_job(&job);
                if !claim.overlaps(&other) {
                    continue;
                }
                let hosts = match claim.shared_with(&other) {
                    Some(shared) => shared.into_iter().collect::<Vec<_>>().join(", "),
                    None => "all hosts".to_string(),
                };
                warnings.push(format!(
                    "{hosts} targeted by {status} job {}; this job would wait for it",
                    job.job_id
                ));
            }
        }

        Ok(PlanPreview::new(&prepared.plan, prepared.totals, warnings))
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        Ok(self.store.get(job_id).await?)
    }

    /// One page of job summaries, newest first. `page` is 1-based.
    pub async fn list_jobs(&self, page: u32, page_size: u32, filter: JobFilter) -> Result<JobPage> {
        if page == 0 {
            return Err(FleetError::invalid_request("page must be at least 1"));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(FleetError::invalid_request(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let (jobs, total) = self.store.list(&filter, page, page_size).await?;
        Ok(JobPage {
            jobs: jobs.iter().map(Job::summary).collect(),
            total,
            page,
            page_size,
        })
    }

    /// Log lines at or after `offset`
    pub async fn logs(&self, job_id: Uuid, offset: u64) -> Result<Vec<LogLine>> {
        Ok(self.job_log(job_id).await?.lines_from(offset))
    }

    /// Backlog then live lines until the job reaches a terminal state
    pub async fn subscribe(&self, job_id: Uuid) -> Result<LogSubscription> {
        Ok(self.job_log(job_id).await?.subscribe())
    }

    /// Cancel a job.
    ///
    /// A queued job becomes `cancelled` immediately. A running job is flagged
    /// and returned still `running`; the worker stops at the next step
    /// boundary. Terminal jobs yield [`FleetError::AlreadyTerminal`].
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.store.get(job_id).await?;
        match job.status {
            JobState::Queued => self.cancel_queued(job_id).await,
            JobState::Running => self.request_running_cancel(job_id).await,
            status => Err(FleetError::AlreadyTerminal { job_id, status }),
        }
    }

    async fn cancel_queued(&self, job_id: Uuid) -> Result<Job> {
        let transition = Transition::new(JobEvent::Cancel).expecting(JobState::Queued);
        match self.store.transition(job_id, transition).await {
            Ok(job) => {
                self.finish_log(job_id, "Job cancelled by user before dispatch")
                    .await;
                crate::log_job!(info, "job_cancelled", job_id: job_id, was: "queued");
                self.events
                    .publish(events::JOB_CANCELLED, job_id, job.status, json!({}));
                self.dispatch_signal.notify_one();
                Ok(job)
            }
            // Lost the race with the dispatcher
            Err(StoreError::StatusMismatch {
                actual: JobState::Running,
                ..
            }) => self.request_running_cancel(job_id).await,
            Err(StoreError::StatusMismatch { actual, .. }) => Err(FleetError::AlreadyTerminal {
                job_id,
                status: actual,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn request_running_cancel(&self, job_id: Uuid) -> Result<Job> {
        let first_request = match self.cancellations.get(&job_id) {
            Some(flag) => !flag.swap(true, Ordering::SeqCst),
            None => true,
        };

        let job = self.store.mark_cancel_requested(job_id).await?;
        if job.is_terminal() {
            return Err(FleetError::AlreadyTerminal {
                job_id,
                status: job.status,
            });
        }

        if first_request {
            if let Some(log) = self.logs.get(job_id) {
                if let Some(line) =
                    log.append("Cancellation requested; stopping after the current step")
                {
                    self.persist_line(job_id, &line).await;
                }
            }
            crate::log_job!(info, "job_cancel_requested", job_id: job_id);
            self.events
                .publish(events::JOB_CANCEL_REQUESTED, job_id, job.status, json!({}));
        }
        Ok(job)
    }

    pub async fn statistics(&self) -> Result<JobStatistics> {
        Ok(self.store.statistics().await?)
    }

    /// Components grouped by platform and category, optionally filtered
    pub fn list_components(&self, platform: Option<&str>) -> ComponentListing {
        self.catalog.listing(platform)
    }

    /// Deployment environments a job may target
    pub fn list_environments(&self) -> &[String] {
        &self.config.environments
    }

    /// Wait until the job's log ends, then return the job
    pub async fn await_terminal(&self, job_id: Uuid) -> Result<Job> {
        let mut subscription = self.subscribe(job_id).await?;
        while subscription.next().await.is_some() {}
        self.get_job(job_id).await
    }

    fn prepare(&self, request: &JobRequest) -> Result<PreparedRequest> {
        validate_environment(&request.environment, &self.config.environments)?;
        validate_target_hosts(&request.target_hosts)?;
        validate_options_payload(&request.options)?;

        let platform = request
            .platform
            .as_deref()
            .unwrap_or(&self.config.default_platform);
        if platform.trim().is_empty() || platform == UNIVERSAL_PLATFORM {
            return Err(FleetError::invalid_request(format!(
                "'{platform}' is not a deployable platform"
            )));
        }

        let set = DependencyResolver::new(&self.catalog)
            .resolve(request.components.as_slice(), platform)?;
        let available = request
            .available_resources
            .clone()
            .unwrap_or_else(|| self.config.available_resources.clone());
        let totals = CompatibilityValidator::new(available).check(&set)?;
        let plan = ExecutionPlanner::new().build(&set, request.execution_mode);

        Ok(PreparedRequest { plan, totals })
    }

    /// The live log for a job, rebuilt from the store when this process has
    /// not seen it yet
    pub(super) async fn job_log(&self, job_id: Uuid) -> Result<Arc<JobLog>> {
        if let Some(log) = self.logs.get(job_id) {
            return Ok(log);
        }
        let job = self.store.get(job_id).await?;
        self.hydrate_log(job_id, job.is_terminal()).await
    }

    async fn hydrate_log(&self, job_id: Uuid, closed: bool) -> Result<Arc<JobLog>> {
        let lines = self.store.logs(job_id, 0).await?;
        Ok(self.logs.open_with(job_id, || (lines, closed)))
    }

    pub(super) async fn persist_line(&self, job_id: Uuid, line: &LogLine) {
        if let Err(e) = self.store.append_log(job_id, line).await {
            warn!(
                job_id = %job_id,
                offset = line.offset,
                error = %e,
                "📜 LOGS: Failed to persist log line"
            );
        }
    }

    /// Append a last line and end the job's log stream
    pub(super) async fn finish_log(&self, job_id: Uuid, final_line: &str) {
        // Callers have already moved the job to a terminal state, so a log
        // rebuilt here must stay open for the final line
        let log = match self.logs.get(job_id) {
            Some(log) => Ok(log),
            None => self.hydrate_log(job_id, false).await,
        };
        match log {
            Ok(log) => {
                if let Some(line) = log.append(final_line) {
                    self.persist_line(job_id, &line).await;
                }
                log.close();
            }
            Err(e) => warn!(
                job_id = %job_id,
                error = %e,
                "📜 LOGS: Could not close job log"
            ),
        }
    }
}
