//! # Lifecycle Event Publisher
//!
//! Broadcast channel for job lifecycle events (created, started, step
//! finished, completed, failed, cancelled, timed out). Publishing never waits:
//! with no subscribers the event is dropped, and a lagging subscriber loses
//! the oldest events.
//!
//! ```rust
//! use fleet_core::constants::events;
//! use fleet_core::events::EventPublisher;
//! use fleet_core::JobState;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut receiver = publisher.subscribe();
//!
//! let job_id = Uuid::new_v4();
//! publisher.publish(events::JOB_CREATED, job_id, JobState::Queued, json!({}));
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.name, events::JOB_CREATED);
//! assert_eq!(event.job_id, job_id);
//! # });
//! ```

use crate::constants::system::EVENT_CHANNEL_CAPACITY;
use crate::state_machine::JobState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast publisher for job lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<LifecycleEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    /// One of [`crate::constants::events`]
    pub name: &'static str,
    pub job_id: Uuid,
    pub status: JobState,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, name: &'static str, job_id: Uuid, status: JobState, context: Value) {
        let event = LifecycleEvent {
            name,
            job_id,
            status,
            context,
            published_at: Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
