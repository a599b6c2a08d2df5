//! Event types for the import event system
//!
//! Provides the shared `ImportEvent` definitions and the `EventBus` every
//! component publishes on. Out-of-process observers (the SSE stream) read
//! from the same bus.

mod import_types;

pub use import_types::{ImportStage, JobStatus, ProgressSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Import event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// Job accepted and placed on the queue
    JobQueued {
        job_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A worker picked the job up
    JobStarted {
        job_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// Stage cursor advanced
    StageChanged {
        job_id: String,
        old_stage: ImportStage,
        new_stage: ImportStage,
        timestamp: DateTime<Utc>,
    },

    /// Progress snapshot
    ///
    /// Emitted for every progress update; delivered in non-decreasing
    /// `processed_rows` order per job.
    ProgressUpdated { snapshot: ProgressSnapshot },

    /// Stage failed with a transient error, job will run again after `delay_ms`
    JobRetrying {
        job_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Heartbeat missed, job requeued (or failed when `requeued` is false)
    JobStalled {
        job_id: String,
        stall_count: u32,
        requeued: bool,
        timestamp: DateTime<Utc>,
    },

    JobCompleted {
        job_id: String,
        successful_rows: usize,
        failed_rows: usize,
        timestamp: DateTime<Utc>,
    },

    JobFailed {
        job_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    JobCancelled {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl ImportEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            ImportEvent::JobQueued { .. } => "JobQueued",
            ImportEvent::JobStarted { .. } => "JobStarted",
            ImportEvent::StageChanged { .. } => "StageChanged",
            ImportEvent::ProgressUpdated { .. } => "ProgressUpdated",
            ImportEvent::JobRetrying { .. } => "JobRetrying",
            ImportEvent::JobStalled { .. } => "JobStalled",
            ImportEvent::JobCompleted { .. } => "JobCompleted",
            ImportEvent::JobFailed { .. } => "JobFailed",
            ImportEvent::JobCancelled { .. } => "JobCancelled",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> &str {
        match self {
            ImportEvent::JobQueued { job_id, .. }
            | ImportEvent::JobStarted { job_id, .. }
            | ImportEvent::StageChanged { job_id, .. }
            | ImportEvent::JobRetrying { job_id, .. }
            | ImportEvent::JobStalled { job_id, .. }
            | ImportEvent::JobCompleted { job_id, .. }
            | ImportEvent::JobFailed { job_id, .. }
            | ImportEvent::JobCancelled { job_id, .. } => job_id,
            ImportEvent::ProgressUpdated { snapshot } => &snapshot.job_id,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper around `tokio::sync::broadcast`. Cloning shares the channel.
///
/// # Examples
///
/// ```
/// use sked_common::events::{EventBus, ImportEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ImportEvent::JobCancelled {
///     job_id: "job-1".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().job_id(), "job-1");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers
    ///   start dropping the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ImportEvent,
    ) -> Result<usize, broadcast::error::SendError<ImportEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ImportEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(job_id: &str) -> ImportEvent {
        ImportEvent::JobCancelled {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus.emit(cancelled("a")).is_err());
        // Lossy variant never fails
        bus.emit_lossy(cancelled("a"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(cancelled("first")).unwrap();
        bus.emit(cancelled("second")).unwrap();

        assert_eq!(rx.recv().await.unwrap().job_id(), "first");
        assert_eq!(rx.recv().await.unwrap().job_id(), "second");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(cancelled("job-9")).unwrap();
        assert_eq!(json["type"], "JobCancelled");
        assert_eq!(json["job_id"], "job-9");
        assert_eq!(cancelled("x").event_type(), "JobCancelled");
    }
}
