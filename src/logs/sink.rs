use super::{JobLog, LogLine};
use crate::store::JobStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

enum PersistCommand {
    Line(LogLine),
    Flush(oneshot::Sender<()>),
}

/// Write handle for one job's log.
///
/// Lines are appended to the in-memory [`JobLog`] synchronously and queued for
/// the store on an unbounded channel, so a slow store never stalls the
/// executor. [`flush`](Self::flush) waits until everything queued so far has
/// been written.
#[derive(Debug, Clone)]
pub struct LineSink {
    log: Arc<JobLog>,
    persist: mpsc::UnboundedSender<PersistCommand>,
}

impl std::fmt::Debug for PersistCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line(line) => f.debug_tuple("Line").field(&line.offset).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl LineSink {
    /// Start the persistence pump for `log` and return a sink feeding it
    pub fn spawn(log: Arc<JobLog>, store: Arc<dyn JobStore>) -> Self {
        let (persist, mut commands) = mpsc::unbounded_channel::<PersistCommand>();
        let job_id = log.job_id();

        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    PersistCommand::Line(line) => {
                        if let Err(e) = store.append_log(job_id, &line).await {
                            warn!(
                                job_id = %job_id,
                                offset = line.offset,
                                error = %e,
                                "📜 LOGS: Failed to persist log line"
                            );
                        }
                    }
                    PersistCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { log, persist }
    }

    pub fn job_id(&self) -> Uuid {
        self.log.job_id()
    }

    /// Append a line; returns `None` if the log has already been closed
    pub fn line(&self, line: impl Into<String>) -> Option<LogLine> {
        let entry = self.log.append(line)?;
        let _ = self.persist.send(PersistCommand::Line(entry.clone()));
        Some(entry)
    }

    /// Append several lines in order
    pub fn lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.line(line);
        }
    }

    /// Wait until every line queued so far has reached the store
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.persist.send(PersistCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flush, then close the underlying log
    pub async fn close(&self) -> bool {
        self.flush().await;
        self.log.close()
    }

    pub fn log(&self) -> &Arc<JobLog> {
        &self.log
    }
}
