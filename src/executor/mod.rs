//! # Step Executor
//!
//! The [`Executor`] trait is the only place host-level behaviour lives. The job
//! manager never branches on component identity: it hands each plan step to the
//! executor together with a [`LineSink`] for streaming output, and records the
//! returned [`StepReport`].
//!
//! An `Err` from [`Executor::execute`] means the executor itself broke (could
//! not spawn, lost its connection); it is recorded as a failed step with the
//! full error chain in the job log. A step that ran and failed is an `Ok`
//! report with `success: false`.

mod command;

pub use command::CommandExecutor;

use crate::logs::LineSink;
use crate::planner::{ExecutionMode, PlanStep};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Everything an executor needs to run one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub job_id: Uuid,
    pub environment: String,
    pub platform: String,
    pub step: PlanStep,
    pub step_count: usize,
    /// Empty means every eligible host
    pub target_hosts: Vec<String>,
    pub mode: ExecutionMode,
    pub options: Value,
}

impl StepContext {
    pub fn component(&self) -> &str {
        &self.step.component
    }

    /// Hosts as a comma-separated list, or `all`
    pub fn hosts_arg(&self) -> String {
        if self.target_hosts.is_empty() {
            "all".to_string()
        } else {
            self.target_hosts.join(",")
        }
    }
}

/// Outcome of one step as reported by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub success: bool,
    /// Host state was changed
    pub changed: bool,
    pub message: Option<String>,
    pub exit_code: Option<i32>,
}

impl StepReport {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            changed: true,
            message: None,
            exit_code: Some(0),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: false,
            message: Some(message.into()),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn unchanged(mut self) -> Self {
        self.changed = false;
        self
    }
}

/// External collaborator that applies one plan step to the target hosts
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str {
        "executor"
    }

    /// Run one step, streaming output lines into `output` as they arrive.
    ///
    /// In [`ExecutionMode::Check`] the executor must not change host state.
    async fn execute(&self, ctx: &StepContext, output: &LineSink) -> anyhow::Result<StepReport>;
}
