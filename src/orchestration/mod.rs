//! # Orchestration
//!
//! Job lifecycle on top of the catalog, resolver, validator and planner.
//!
//! ## Components
//!
//! - **JobManager**: create, inspect, cancel and follow jobs
//! - **Dispatcher**: FIFO dispatch into a bounded worker pool with host-level
//!   mutual exclusion
//! - **Worker**: runs one job's plan through the [`Executor`](crate::executor::Executor)
//! - **Sweeps**: job timeouts, retention cleanup and start-up recovery
//! - **OrchestrationSystem**: starts and stops the background loops
//!
//! ## Concurrency model
//!
//! At most `max_concurrent_jobs` workers run at once, one per running job, and
//! a host is the target of at most one running job. Steps inside a job run in
//! plan order. Creating, cancelling and reading jobs never waits on a worker.

pub mod bootstrap;
mod dispatcher;
pub mod job_manager;
mod sweeper;
pub mod types;
mod worker;

pub use bootstrap::OrchestrationSystem;
pub use job_manager::{JobManager, MAX_PAGE_SIZE};
pub use types::{DispatchReport, HostClaim, SweepReport, SystemHealth};
