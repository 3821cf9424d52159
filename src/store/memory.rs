use super::{apply_transition, page_offset, JobStore, StoreError, StoreResult, Transition};
use crate::logs::LogLine;
use crate::models::{Job, JobFilter, JobStatistics};
use crate::state_machine::JobState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug)]
struct JobRecord {
    job: Job,
    logs: BTreeMap<u64, LogLine>,
}

/// Process-local store; the DashMap shard lock is the per-job mutation point
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: DashMap<Uuid, JobRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn not_found(job_id: Uuid) -> StoreError {
        StoreError::NotFound { job_id }
    }
}

fn matches_filter(job: &Job, filter: &JobFilter) -> bool {
    filter.status.map_or(true, |status| job.status == status)
        && filter
            .owner
            .as_ref()
            .map_or(true, |owner| job.owner.as_ref() == Some(owner))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        self.records.insert(
            job.job_id,
            JobRecord {
                job: job.clone(),
                logs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> StoreResult<Job> {
        self.records
            .get(&job_id)
            .map(|record| record.job.clone())
            .ok_or_else(|| Self::not_found(job_id))
    }

    async fn transition(&self, job_id: Uuid, transition: Transition) -> StoreResult<Job> {
        let mut record = self
            .records
            .get_mut(&job_id)
            .ok_or_else(|| Self::not_found(job_id))?;

        // Apply to a copy so a rejected transition leaves the record untouched
        let mut job = record.job.clone();
        apply_transition(&mut job, transition, Utc::now())?;
        record.job = job.clone();
        Ok(job)
    }

    async fn mark_cancel_requested(&self, job_id: Uuid) -> StoreResult<Job> {
        let mut record = self
            .records
            .get_mut(&job_id)
            .ok_or_else(|| Self::not_found(job_id))?;

        if record.job.status == JobState::Running {
            record.job.cancel_requested = true;
        }
        Ok(record.job.clone())
    }

    async fn append_log(&self, job_id: Uuid, line: &LogLine) -> StoreResult<()> {
        let mut record = self
            .records
            .get_mut(&job_id)
            .ok_or_else(|| Self::not_found(job_id))?;

        record
            .logs
            .entry(line.offset)
            .or_insert_with(|| line.clone());
        Ok(())
    }

    async fn logs(&self, job_id: Uuid, offset: u64) -> StoreResult<Vec<LogLine>> {
        let record = self
            .records
            .get(&job_id)
            .ok_or_else(|| Self::not_found(job_id))?;

        Ok(record.logs.range(offset..).map(|(_, line)| line.clone()).collect())
    }

    async fn list(
        &self,
        filter: &JobFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<(Vec<Job>, u64)> {
        let mut jobs: Vec<Job> = self
            .records
            .iter()
            .filter(|record| matches_filter(&record.job, filter))
            .map(|record| record.job.clone())
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });

        let total = jobs.len() as u64;
        let page = jobs
            .into_iter()
            .skip(page_offset(page, page_size))
            .take(page_size as usize)
            .collect();
        Ok((page, total))
    }

    async fn jobs_with_status(&self, status: JobState) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .records
            .iter()
            .filter(|record| record.job.status == status)
            .map(|record| record.job.clone())
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(jobs)
    }

    async fn statistics(&self) -> StoreResult<JobStatistics> {
        let mut stats = JobStatistics::default();
        let mut durations = Vec::new();

        for record in self.records.iter() {
            let job = &record.job;
            stats.total += 1;
            *stats.by_status.entry(job.status).or_default() += 1;
            if matches!(job.status, JobState::Completed | JobState::Failed) {
                if let Some(ms) = job.duration_ms() {
                    durations.push(ms as f64 / 1000.0);
                }
            }
        }

        if !durations.is_empty() {
            stats.average_duration_seconds =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        Ok(stats)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let expired: Vec<Uuid> = self
            .records
            .iter()
            .filter(|record| record.job.is_terminal() && record.job.created_at < cutoff)
            .map(|record| record.job.job_id)
            .collect();

        // Re-check under the entry lock in case the job changed meanwhile
        let mut deleted = Vec::with_capacity(expired.len());
        for job_id in expired {
            if self
                .records
                .remove_if(&job_id, |_, record| record.job.is_terminal())
                .is_some()
            {
                deleted.push(job_id);
            }
        }
        Ok(deleted)
    }
}
