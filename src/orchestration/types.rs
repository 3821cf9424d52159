//! # Orchestration Types
//!
//! Small value types shared by the dispatcher, the sweeps and the bootstrap
//! handle.

use crate::constants::HealthStatus;
use crate::models::{Job, JobRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Hosts a running job holds exclusively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostClaim {
    /// The job targets every eligible host
    All,
    Hosts(BTreeSet<String>),
}

impl HostClaim {
    /// The claim a job holds while running, whatever its execution mode
    pub fn for_job(job: &Job) -> Self {
        Self::from_hosts(&job.target_hosts)
    }

    /// The claim a job created from `request` would hold
    pub fn for_job_request(request: &JobRequest) -> Self {
        Self::from_hosts(&request.target_hosts)
    }

    fn from_hosts(hosts: &BTreeSet<String>) -> Self {
        if hosts.is_empty() {
            Self::All
        } else {
            Self::Hosts(hosts.clone())
        }
    }

    pub fn overlaps(&self, other: &HostClaim) -> bool {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => true,
            (Self::Hosts(a), Self::Hosts(b)) => !a.is_disjoint(b),
        }
    }

    /// Hosts shared with `other`; `None` stands for "every host"
    pub fn shared_with(&self, other: &HostClaim) -> Option<BTreeSet<String>> {
        match (self, other) {
            (Self::Hosts(a), Self::Hosts(b)) => Some(a.intersection(b).cloned().collect()),
            (Self::Hosts(hosts), Self::All) | (Self::All, Self::Hosts(hosts)) => {
                Some(hosts.clone())
            }
            (Self::All, Self::All) => None,
        }
    }
}

/// What one dispatch cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatched: Vec<Uuid>,
    /// Queued jobs held back by a host reservation
    pub waiting_on_hosts: usize,
    /// Queued jobs left because every worker slot was taken
    pub waiting_on_capacity: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.dispatched.is_empty()
    }
}

/// What one sweep pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub timed_out: Vec<Uuid>,
    pub cleaned_up: Vec<Uuid>,
}

/// Point-in-time health of a started orchestration system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub dispatcher_alive: bool,
    pub sweeper_alive: bool,
    pub queued: usize,
    pub running: usize,
    pub max_concurrent_jobs: usize,
    pub uptime_seconds: u64,
}
