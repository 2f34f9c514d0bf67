//! Scheduler event system.
//!
//! The scheduler reports batch and task lifecycle transitions through an
//! injected [`EventSink`]; logging and telemetry hook in at this seam.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Structured notification emitted by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    /// A batch began executing.
    BatchStarted {
        /// Batch run id.
        batch_id: Uuid,
        /// Number of tasks submitted.
        total_tasks: usize,
    },
    /// A task entered the Running state.
    TaskStarted {
        /// Task id within the batch.
        task_id: String,
        /// Executor the task was dispatched to.
        agent_type: String,
    },
    /// A task completed successfully.
    TaskCompleted {
        /// Task id within the batch.
        task_id: String,
        /// Wall-clock execution time in milliseconds.
        duration_ms: u64,
    },
    /// A task failed or timed out.
    TaskFailed {
        /// Task id within the batch.
        task_id: String,
        /// Error message recorded on the task.
        error: String,
    },
    /// A batch finished.
    BatchCompleted {
        /// Batch run id.
        batch_id: Uuid,
        /// Tasks that completed successfully.
        completed: usize,
        /// Tasks that failed.
        failed: usize,
    },
}

/// Observer seam for scheduler notifications.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Implementations must not block.
    fn emit(&self, event: SchedulerEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SchedulerEvent) {}
}

/// Channel-backed sink delivering events to a consumer task.
#[derive(Clone)]
pub struct EventChannel {
    sender: mpsc::UnboundedSender<SchedulerEvent>,
}

impl EventChannel {
    /// Creates a channel sink plus the receiving half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Creates a sink from an existing sender (for testing).
    pub fn from_sender(sender: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for EventChannel {
    fn emit(&self, event: SchedulerEvent) {
        if let Err(error) = self.sender.send(event) {
            warn!("failed to deliver scheduler event: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_events() {
        let (sink, mut receiver) = EventChannel::new();
        sink.emit(SchedulerEvent::TaskStarted {
            task_id: "t1".to_owned(),
            agent_type: "builder".to_owned(),
        });

        match receiver.recv().await {
            Some(SchedulerEvent::TaskStarted { task_id, .. }) => assert_eq!(task_id, "t1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = EventChannel::new();
        drop(receiver);
        // Must not panic; failure is logged and swallowed.
        sink.emit(SchedulerEvent::BatchCompleted {
            batch_id: Uuid::new_v4(),
            completed: 0,
            failed: 0,
        });
    }
}
