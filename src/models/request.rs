use super::job::JobSummary;
use crate::planner::ExecutionMode;
use crate::state_machine::JobState;
use crate::validation::AvailableResources;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A deploy request as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub components: Vec<String>,
    pub environment: String,
    /// Falls back to the configured default platform
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub target_hosts: BTreeSet<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub owner: Option<String>,
    /// Overrides the configured capacity for this request only
    #[serde(default)]
    pub available_resources: Option<AvailableResources>,
}

impl JobRequest {
    pub fn new<I, S>(components: I, environment: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
            environment: environment.into(),
            platform: None,
            target_hosts: BTreeSet::new(),
            execution_mode: ExecutionMode::Normal,
            options: Value::Null,
            owner: None,
            available_resources: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_available_resources(mut self, available: AvailableResources) -> Self {
        self.available_resources = Some(available);
        self
    }
}

/// Filters for listing jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobState>,
    pub owner: Option<String>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobState) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// One page of job summaries, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<JobSummary>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl JobPage {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(u64::from(self.page_size))
        }
    }
}

/// Aggregate job counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: u64,
    pub by_status: BTreeMap<JobState, u64>,
    /// Mean run time of completed and failed jobs
    pub average_duration_seconds: Option<f64>,
}
