//! # Test Utilities
//!
//! Fixtures shared by unit tests and the integration suites: a small catalog,
//! a fast-ticking configuration, a ready-made queued job, and
//! [`ScriptedExecutor`], an executor whose per-component behaviour is set by
//! the test and which records what it was asked to run.

use crate::catalog::{
    categories, Component, ComponentCatalog, ResourceRequirements, UNIVERSAL_PLATFORM,
};
use crate::config::FleetConfig;
use crate::executor::{Executor, StepContext, StepReport};
use crate::logs::LineSink;
use crate::models::Job;
use crate::orchestration::JobManager;
use crate::planner::{ExecutionMode, ExecutionPlanner};
use crate::resolver::DependencyResolver;
use crate::state_machine::JobState;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

fn resources(memory_mb: u64, ports: &[u16]) -> ResourceRequirements {
    ResourceRequirements {
        min_memory_mb: memory_mb,
        min_disk_mb: 100,
        cpu_cores: 1,
        ports: ports.iter().copied().collect(),
    }
}

/// `tracker` requires `api` and `python`; `api` requires `python`.
///
/// `legacy-api` conflicts with `api` and shares its port; `ubuntu-docker` and
/// `macos-api` have no platform in common.
pub fn fixture_catalog() -> ComponentCatalog {
    ComponentCatalog::new([
        Component::new("python")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_category(categories::RUNTIME)
            .with_priority(80)
            .with_resources(resources(512, &[])),
        Component::new("api")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_requires(["python"])
            .with_category(categories::SERVICE)
            .with_priority(50)
            .with_resources(resources(256, &[8080])),
        Component::new("tracker")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_requires(["api", "python"])
            .with_category(categories::SERVICE)
            .with_priority(40)
            .with_resources(resources(256, &[9090])),
        Component::new("legacy-api")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_conflicts(["api"])
            .with_category(categories::SERVICE)
            .with_resources(resources(256, &[8080])),
        Component::new("ubuntu-docker")
            .with_platforms(["ubuntu"])
            .with_category(categories::RUNTIME)
            .with_resources(resources(1024, &[2375])),
        Component::new("macos-api")
            .with_platforms(["macos"])
            .with_category(categories::SERVICE)
            .with_resources(resources(256, &[8081])),
    ])
    .expect("fixture catalog has unique names")
}

/// Defaults with a fast dispatcher and a sweeper that stays out of the way
pub fn test_config() -> FleetConfig {
    FleetConfig {
        max_concurrent_jobs: 2,
        dispatch_interval_ms: 10,
        sweep_interval_seconds: 3600,
        log_subscriber_buffer: 64,
        ..FleetConfig::default()
    }
}

/// A queued `tracker` job for staging on ubuntu, targeting every host
pub fn sample_job() -> Job {
    let catalog = fixture_catalog();
    let set = DependencyResolver::new(&catalog)
        .resolve(&["tracker"], "ubuntu")
        .expect("fixture catalog resolves tracker");
    let plan = ExecutionPlanner::new().build(&set, ExecutionMode::Normal);
    Job::new(
        "staging",
        vec!["tracker".to_string()],
        plan,
        BTreeSet::new(),
        serde_json::Value::Null,
        None,
        Utc::now(),
    )
}

/// In-memory manager over the fixture catalog
pub fn test_manager(config: FleetConfig, executor: Arc<dyn Executor>) -> Arc<JobManager> {
    JobManager::in_memory(config, fixture_catalog(), executor)
}

/// Poll until `condition` holds; false on timeout
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll the manager until the job reaches `status`
pub async fn wait_for_status(
    manager: &JobManager,
    job_id: Uuid,
    status: JobState,
    timeout: Duration,
) -> Option<Job> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(job) = manager.get_job(job_id).await {
            if job.status == status {
                return Some(job);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// What a scripted step does once it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepBehavior {
    Succeed,
    /// Report a failed step
    Fail(String),
    /// Return an executor error
    Error(String),
}

/// One `execute` call as seen by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStep {
    pub job_id: Uuid,
    pub component: String,
    pub mode: ExecutionMode,
    pub hosts: Vec<String>,
}

/// Executor driven entirely by the test.
///
/// Components succeed unless given another [`StepBehavior`]. A gated executor
/// holds every step until the test releases it, which makes "while a step is
/// in progress" scenarios deterministic. Concurrency is tracked across jobs:
/// the peak number of steps in flight and whether two jobs ever ran on an
/// overlapping host at the same time.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    behaviors: Mutex<HashMap<String, StepBehavior>>,
    output_lines: usize,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    active: Mutex<Vec<(Uuid, Vec<String>)>>,
    host_overlap: AtomicBool,
    executed: Mutex<Vec<ExecutedStep>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(self, component: impl Into<String>, behavior: StepBehavior) -> Self {
        self.behaviors.lock().insert(component.into(), behavior);
        self
    }

    /// Emit `count` output lines per step
    pub fn with_output_lines(mut self, count: usize) -> Self {
        self.output_lines = count;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold each step until [`release`](Self::release) is called
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn set_behavior(&self, component: impl Into<String>, behavior: StepBehavior) {
        self.behaviors.lock().insert(component.into(), behavior);
    }

    /// Let `steps` gated steps proceed
    pub fn release(&self, steps: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(steps);
        }
    }

    /// Let every current and future gated step proceed
    pub fn open_gate(&self) {
        self.release(1_000_000);
    }

    /// Steps that have entered `execute`
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn host_overlap_detected(&self) -> bool {
        self.host_overlap.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<ExecutedStep> {
        self.executed.lock().clone()
    }

    /// Components executed for one job, in call order
    pub fn components_for(&self, job_id: Uuid) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .filter(|step| step.job_id == job_id)
            .map(|step| step.component.clone())
            .collect()
    }

    fn enter(&self, ctx: &StepContext) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut active = self.active.lock();
        let overlapping = active.iter().any(|(job_id, hosts)| {
            *job_id != ctx.job_id
                && (hosts.is_empty()
                    || ctx.target_hosts.is_empty()
                    || hosts.iter().any(|h| ctx.target_hosts.contains(h)))
        });
        if overlapping {
            self.host_overlap.store(true, Ordering::SeqCst);
        }
        active.push((ctx.job_id, ctx.target_hosts.clone()));
    }

    fn leave(&self, ctx: &StepContext) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut active = self.active.lock();
        if let Some(position) = active.iter().position(|(job_id, _)| *job_id == ctx.job_id) {
            active.remove(position);
        }
    }

    async fn run(&self, ctx: &StepContext, output: &LineSink) -> anyhow::Result<StepReport> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let component = ctx.component();
        for n in 1..=self.output_lines {
            output.line(format!("{component}: output line {n}"));
        }

        let behavior = self
            .behaviors
            .lock()
            .get(component)
            .cloned()
            .unwrap_or(StepBehavior::Succeed);
        match behavior {
            StepBehavior::Succeed => Ok(StepReport::succeeded()),
            StepBehavior::Fail(message) => Ok(StepReport::failed(message).with_exit_code(2)),
            StepBehavior::Error(message) => {
                Err(anyhow::anyhow!(message).context(format!("running {component}")))
            }
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, ctx: &StepContext, output: &LineSink) -> anyhow::Result<StepReport> {
        self.executed.lock().push(ExecutedStep {
            job_id: ctx.job_id,
            component: ctx.component().to_string(),
            mode: ctx.mode,
            hosts: ctx.target_hosts.clone(),
        });

        self.enter(ctx);
        let result = self.run(ctx, output).await;
        self.leave(ctx);
        result
    }
}
