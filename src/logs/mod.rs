//! # Job Log Stream
//!
//! Per-job append-only log with two access paths:
//!
//! - **pull**: [`JobLog::lines_from`] returns every line at or after an offset.
//! - **push**: [`JobLog::subscribe`] yields the backlog, then live lines, then
//!   [`LogEvent::End`] once the log is closed.
//!
//! Live fan-out uses a bounded `tokio::sync::broadcast` channel. Appending
//! never waits on subscribers; a subscriber that falls more than the buffer
//! behind receives [`LogEvent::Gap`] and resumes with newer lines.

mod sink;
mod subscription;

pub use sink::LineSink;
pub use subscription::LogSubscription;

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One timestamped log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Zero-based position in the job's log
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.line
        )
    }
}

/// What a subscriber observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(LogLine),
    /// The subscriber fell behind and `missed` lines were dropped for it
    Gap { missed: u64 },
    /// The log is closed; no further events follow
    End,
}

#[derive(Debug, Clone)]
pub(crate) enum Broadcast {
    Line(LogLine),
    Closed,
}

#[derive(Debug, Default)]
struct LogState {
    lines: Vec<LogLine>,
    closed: bool,
}

/// Append-only log for one job
#[derive(Debug)]
pub struct JobLog {
    job_id: Uuid,
    state: RwLock<LogState>,
    sender: broadcast::Sender<Broadcast>,
}

impl JobLog {
    /// Create an empty open log; `buffer` bounds each live subscriber
    pub fn new(job_id: Uuid, buffer: usize) -> Self {
        Self::with_backlog(job_id, Vec::new(), false, buffer)
    }

    /// Rebuild a log from persisted lines
    pub fn with_backlog(job_id: Uuid, lines: Vec<LogLine>, closed: bool, buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            job_id,
            state: RwLock::new(LogState { lines, closed }),
            sender,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Append a line and fan it out. Returns `None` once the log is closed.
    pub fn append(&self, line: impl Into<String>) -> Option<LogLine> {
        let mut state = self.state.write();
        if state.closed {
            return None;
        }

        let entry = LogLine {
            offset: state.lines.len() as u64,
            timestamp: Utc::now(),
            line: line.into(),
        };
        state.lines.push(entry.clone());
        // Sent under the lock so subscribers see lines in offset order;
        // an error only means nobody is listening.
        let _ = self.sender.send(Broadcast::Line(entry.clone()));
        Some(entry)
    }

    /// Every line at or after `offset`
    pub fn lines_from(&self, offset: u64) -> Vec<LogLine> {
        let state = self.state.read();
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(state.lines.len());
        state.lines[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.state.read().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Close the log and signal end-of-stream. Returns false if already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.write();
        if state.closed {
            return false;
        }
        state.closed = true;
        let _ = self.sender.send(Broadcast::Closed);
        true
    }

    /// Subscribe to the backlog followed by live lines
    pub fn subscribe(&self) -> LogSubscription {
        // Holding the read lock blocks appends, so each line lands either in
        // the snapshot or on the receiver
        let state = self.state.read();
        let receiver = (!state.closed).then(|| self.sender.subscribe());
        LogSubscription::new(state.lines.clone(), receiver)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Registry of live job logs
#[derive(Debug)]
pub struct LogHub {
    logs: DashMap<Uuid, Arc<JobLog>>,
    buffer: usize,
}

impl LogHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            logs: DashMap::new(),
            buffer,
        }
    }

    /// Get the log for `job_id`, creating an empty one if needed
    pub fn open(&self, job_id: Uuid) -> Arc<JobLog> {
        self.logs
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobLog::new(job_id, self.buffer)))
            .clone()
    }

    /// Get the log for `job_id`, rebuilding it from `load` if needed
    pub fn open_with(
        &self,
        job_id: Uuid,
        load: impl FnOnce() -> (Vec<LogLine>, bool),
    ) -> Arc<JobLog> {
        self.logs
            .entry(job_id)
            .or_insert_with(|| {
                let (lines, closed) = load();
                Arc::new(JobLog::with_backlog(job_id, lines, closed, self.buffer))
            })
            .clone()
    }

    pub fn get(&self, job_id: Uuid) -> Option<Arc<JobLog>> {
        self.logs.get(&job_id).map(|entry| entry.value().clone())
    }

    /// Drop a log from the hub; live subscribers receive `End`
    pub fn remove(&self, job_id: Uuid) -> Option<Arc<JobLog>> {
        self.logs.remove(&job_id).map(|(_, log)| {
            log.close();
            log
        })
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }
}
