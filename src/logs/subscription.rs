use super::{Broadcast, LogEvent, LogLine};
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use tokio::sync::broadcast::{self, error::RecvError};

/// Push-side view of a job log: backlog first, then live lines, then `End`
#[derive(Debug)]
pub struct LogSubscription {
    backlog: VecDeque<LogLine>,
    receiver: Option<broadcast::Receiver<Broadcast>>,
    next_offset: u64,
    finished: bool,
}

impl LogSubscription {
    pub(crate) fn new(backlog: Vec<LogLine>, receiver: Option<broadcast::Receiver<Broadcast>>) -> Self {
        Self {
            backlog: backlog.into(),
            receiver,
            next_offset: 0,
            finished: false,
        }
    }

    /// Next event, or `None` after `End` has been delivered
    pub async fn next(&mut self) -> Option<LogEvent> {
        if self.finished {
            return None;
        }

        if let Some(line) = self.backlog.pop_front() {
            self.next_offset = line.offset + 1;
            return Some(LogEvent::Line(line));
        }

        let Some(receiver) = self.receiver.as_mut() else {
            self.finished = true;
            return Some(LogEvent::End);
        };

        loop {
            match receiver.recv().await {
                Ok(Broadcast::Line(line)) => {
                    if line.offset < self.next_offset {
                        continue;
                    }
                    self.next_offset = line.offset + 1;
                    return Some(LogEvent::Line(line));
                }
                Ok(Broadcast::Closed) | Err(RecvError::Closed) => {
                    self.finished = true;
                    self.receiver = None;
                    return Some(LogEvent::End);
                }
                Err(RecvError::Lagged(missed)) => return Some(LogEvent::Gap { missed }),
            }
        }
    }

    /// Drain every line until the end, ignoring gaps
    pub async fn collect_lines(mut self) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Some(event) = self.next().await {
            if let LogEvent::Line(line) = event {
                lines.push(line);
            }
        }
        lines
    }

    pub fn into_stream(self) -> impl Stream<Item = LogEvent> + Send {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }
}
