//! SQLite-backed job store.
//!
//! Jobs are stored as a JSON payload plus the columns needed for filtering
//! and ordering. Timestamps are RFC 3339 strings with fixed microsecond
//! precision so that text ordering matches time ordering.

use super::{apply_transition, page_offset, JobStore, StoreError, StoreResult, Transition};
use crate::logs::LogLine;
use crate::models::{Job, JobFilter, JobStatistics};
use crate::state_machine::JobState;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS fleet_jobs (
        job_id TEXT PRIMARY KEY NOT NULL,
        status TEXT NOT NULL,
        owner TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_fleet_jobs_status_created
        ON fleet_jobs (status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_fleet_jobs_created ON fleet_jobs (created_at)",
    "CREATE TABLE IF NOT EXISTS fleet_job_logs (
        job_id TEXT NOT NULL,
        line_offset INTEGER NOT NULL,
        logged_at TEXT NOT NULL,
        line TEXT NOT NULL,
        PRIMARY KEY (job_id, line_offset)
    )",
];

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            reason: format!("invalid timestamp '{raw}': {e}"),
        })
}

fn decode_job(row: &SqliteRow) -> StoreResult<Job> {
    let payload: String = row.try_get("payload")?;
    Ok(serde_json::from_str(&payload)?)
}

/// Job store on a SQLite database
#[derive(Debug)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    // SQLite allows one writer; serialising here avoids SQLITE_BUSY retries
    write_lock: Mutex<()>,
}

impl SqliteJobStore {
    /// Connect (creating the database file if needed) and ensure the schema
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if database_url.contains(":memory:") {
            // Each connection to :memory: is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("🗄️ STORE: SQLite job store schema ready");

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(owner) = &filter.owner {
            builder.push(" AND owner = ").push_bind(owner.clone());
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        let payload = serde_json::to_string(job)?;
        let _guard = self.write_lock.lock().await;

        sqlx::query(
            "INSERT INTO fleet_jobs
                (job_id, status, owner, created_at, updated_at, started_at, finished_at, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.job_id.to_string())
        .bind(job.status.as_str())
        .bind(job.owner.clone())
        .bind(encode_ts(&job.created_at))
        .bind(encode_ts(&job.updated_at))
        .bind(job.started_at.as_ref().map(encode_ts))
        .bind(job.finished_at.as_ref().map(encode_ts))
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> StoreResult<Job> {
        let row = sqlx::query("SELECT payload FROM fleet_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { job_id })?;
        decode_job(&row)
    }

    async fn transition(&self, job_id: Uuid, transition: Transition) -> StoreResult<Job> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT payload FROM fleet_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound { job_id })?;
        let mut job = decode_job(&row)?;

        apply_transition(&mut job, transition, Utc::now())?;

        sqlx::query(
            "UPDATE fleet_jobs
             SET status = ?, updated_at = ?, started_at = ?, finished_at = ?, payload = ?
             WHERE job_id = ?",
        )
        .bind(job.status.as_str())
        .bind(encode_ts(&job.updated_at))
        .bind(job.started_at.as_ref().map(encode_ts))
        .bind(job.finished_at.as_ref().map(encode_ts))
        .bind(serde_json::to_string(&job)?)
        .bind(job_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn mark_cancel_requested(&self, job_id: Uuid) -> StoreResult<Job> {
        let _guard = self.write_lock.lock().await;
        let mut job = self.get(job_id).await?;

        if job.status == JobState::Running && !job.cancel_requested {
            job.cancel_requested = true;
            sqlx::query("UPDATE fleet_jobs SET payload = ? WHERE job_id = ?")
                .bind(serde_json::to_string(&job)?)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(job)
    }

    async fn append_log(&self, job_id: Uuid, line: &LogLine) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT OR IGNORE INTO fleet_job_logs (job_id, line_offset, logged_at, line)
             VALUES (?, ?, ?, ?)",
        )
        .bind(job_id.to_string())
        .bind(line.offset as i64)
        .bind(encode_ts(&line.timestamp))
        .bind(line.line.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs(&self, job_id: Uuid, offset: u64) -> StoreResult<Vec<LogLine>> {
        let rows = sqlx::query(
            "SELECT line_offset, logged_at, line FROM fleet_job_logs
             WHERE job_id = ? AND line_offset >= ?
             ORDER BY line_offset ASC",
        )
        .bind(job_id.to_string())
        .bind(offset.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            // Distinguish an unknown job from one with no lines yet
            self.get(job_id).await?;
        }

        rows.iter()
            .map(|row| -> StoreResult<LogLine> {
                let offset: i64 = row.try_get("line_offset")?;
                let logged_at: String = row.try_get("logged_at")?;
                Ok(LogLine {
                    offset: offset as u64,
                    timestamp: decode_ts(&logged_at)?,
                    line: row.try_get("line")?,
                })
            })
            .collect()
    }

    async fn list(
        &self,
        filter: &JobFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<(Vec<Job>, u64)> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS total FROM fleet_jobs WHERE 1 = 1",
        );
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT payload FROM fleet_jobs WHERE 1 = 1");
        Self::push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, job_id DESC LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(page_offset(page, page_size) as i64);

        let jobs = select
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(decode_job)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok((jobs, total as u64))
    }

    async fn jobs_with_status(&self, status: JobState) -> StoreResult<Vec<Job>> {
        sqlx::query(
            "SELECT payload FROM fleet_jobs WHERE status = ?
             ORDER BY created_at ASC, job_id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(decode_job)
        .collect()
    }

    async fn statistics(&self) -> StoreResult<JobStatistics> {
        let mut stats = JobStatistics::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM fleet_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let raw: String = row.try_get("status")?;
            let status = raw
                .parse::<JobState>()
                .map_err(|reason| StoreError::Corrupt { reason })?;
            let n: i64 = row.try_get("n")?;
            stats.by_status.insert(status, n as u64);
            stats.total += n as u64;
        }

        let row = sqlx::query(
            "SELECT AVG((julianday(finished_at) - julianday(started_at)) * 86400.0) AS avg_seconds
             FROM fleet_jobs
             WHERE status IN ('completed', 'failed')
               AND started_at IS NOT NULL AND finished_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        stats.average_duration_seconds = row.try_get("avg_seconds")?;

        Ok(stats)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let cutoff = encode_ts(&cutoff);
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT job_id FROM fleet_jobs WHERE status IN {TERMINAL_STATUSES} AND created_at < ?"
        ))
        .bind(cutoff.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let mut deleted = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.try_get("job_id")?;
            let job_id = Uuid::parse_str(&raw).map_err(|e| StoreError::Corrupt {
                reason: format!("invalid job id '{raw}': {e}"),
            })?;

            sqlx::query("DELETE FROM fleet_job_logs WHERE job_id = ?")
                .bind(raw.as_str())
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM fleet_jobs WHERE job_id = ?")
                .bind(raw.as_str())
                .execute(&mut *tx)
                .await?;
            deleted.push(job_id);
        }

        tx.commit().await?;
        Ok(deleted)
    }
}
