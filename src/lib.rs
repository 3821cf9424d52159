#![allow(clippy::doc_markdown)] // Allow technical terms like SQLite, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleet Core
//!
//! Deployment orchestration for a fleet of hosts: resolve a requested set of
//! components into an ordered, conflict-free deployment, validate it against
//! the target platform and resources, plan it, and run it as a job with a
//! bounded worker pool, host-level mutual exclusion, cooperative cancellation
//! and a live, replayable log.
//!
//! ## Module Organization
//!
//! - [`catalog`] - Component metadata and the built-in fleet catalog
//! - [`resolver`] - Dependency expansion and deterministic ordering
//! - [`validation`] - Platform, conflict, resource and port checks; request input limits
//! - [`planner`] - Execution plans, duration estimates and previews
//! - [`state_machine`] - Job lifecycle states and the transition table
//! - [`store`] - Job persistence (in memory, or SQLite with the `sqlite` feature)
//! - [`logs`] - Per-job append-only logs with live fan-out
//! - [`executor`] - The step executor seam and a command-running adapter
//! - [`orchestration`] - Job manager, dispatcher, workers, sweeps, bootstrap
//! - [`config`] - Layered configuration
//! - [`events`] - Job lifecycle event channel
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_core::catalog::ComponentCatalog;
//! use fleet_core::config::FleetConfig;
//! use fleet_core::executor::CommandExecutor;
//! use fleet_core::models::JobRequest;
//! use fleet_core::orchestration::{JobManager, OrchestrationSystem};
//! use std::sync::Arc;
//!
//! # async fn example() -> fleet_core::Result<()> {
//! let executor = Arc::new(CommandExecutor::new("ansible-playbook").with_args([
//!     "site.yml",
//!     "--tags={component}",
//!     "--limit={hosts}",
//! ]));
//! let manager = JobManager::in_memory(FleetConfig::default(), ComponentCatalog::builtin(), executor);
//! let system = OrchestrationSystem::start(manager.clone()).await?;
//!
//! let job = manager
//!     .create_job(JobRequest::new(["macos-tracker"], "staging").with_platform("macos"))
//!     .await?;
//! let finished = manager.await_terminal(job.job_id).await?;
//! println!("{}: {}", finished.status, finished.message);
//!
//! system.shutdown(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod executor;
pub mod logging;
pub mod logs;
pub mod models;
pub mod orchestration;
pub mod planner;
pub mod resolver;
pub mod state_machine;
pub mod store;
pub mod test_utils;
pub mod validation;

pub use catalog::{Component, ComponentCatalog};
pub use config::{ConfigManager, FleetConfig};
pub use constants::{status_groups, system, HealthStatus};
pub use error::{FleetError, Result};
pub use executor::{CommandExecutor, Executor, StepContext, StepReport};
pub use logs::{LogEvent, LogLine, LogSubscription};
pub use models::{Job, JobFilter, JobPage, JobRequest, JobStatistics};
pub use orchestration::{JobManager, OrchestrationSystem};
pub use planner::{ExecutionMode, ExecutionPlan, PlanPreview};
pub use resolver::{DependencyResolver, ResolutionError, ResolvedSet};
pub use state_machine::{JobEvent, JobState};
pub use store::{InMemoryJobStore, JobStore};
pub use validation::{AvailableResources, CompatibilityValidator, ValidationReport, Violation};

#[cfg(feature = "sqlite")]
pub use store::SqliteJobStore;
