use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::constants::{events, system};
use crate::orchestration::status::TaskSnapshot;
use crate::state_machine::{ExecutionState, TaskState};

/// Lifecycle event pushed to subscribers after every scheduler transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    ExecutionStarted {
        execution_id: Uuid,
        package_name: String,
        total_task_count: usize,
        at: DateTime<Utc>,
    },
    TaskStatusChanged {
        execution_id: Uuid,
        /// `None` when the task was just materialized
        from: Option<TaskState>,
        task: TaskSnapshot,
    },
    ExecutionStatusChanged {
        execution_id: Uuid,
        from: ExecutionState,
        to: ExecutionState,
        at: DateTime<Utc>,
    },
    ExecutionEvicted {
        execution_id: Uuid,
        package_name: String,
    },
}

impl OrchestrationEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::TaskStatusChanged { execution_id, .. }
            | Self::ExecutionStatusChanged { execution_id, .. }
            | Self::ExecutionEvicted { execution_id, .. } => *execution_id,
        }
    }

    /// Dotted event name, as used in structured logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => events::EXECUTION_STARTED,
            Self::ExecutionEvicted { .. } => events::EXECUTION_EVICTED,
            Self::ExecutionStatusChanged { from, to, .. } => match to {
                ExecutionState::Running if *from == ExecutionState::Paused => {
                    events::EXECUTION_RESUMED
                }
                ExecutionState::Running => events::EXECUTION_STARTED,
                ExecutionState::Paused => events::EXECUTION_PAUSED,
                ExecutionState::Completed => events::EXECUTION_COMPLETED,
                ExecutionState::Failed => events::EXECUTION_FAILED,
                ExecutionState::Cancelled => events::EXECUTION_CANCELLED,
            },
            Self::TaskStatusChanged { from, task, .. } => match task.status {
                TaskState::Queued if *from == Some(TaskState::Running) => {
                    events::TASK_RETRY_REQUESTED
                }
                TaskState::Queued => events::TASK_QUEUED,
                TaskState::Running => events::TASK_STARTED,
                TaskState::Paused => events::TASK_PAUSED,
                TaskState::Completed => events::TASK_COMPLETED,
                TaskState::Failed => events::TASK_FAILED,
                TaskState::Cancelled => events::TASK_CANCELLED,
            },
        }
    }
}

/// Broadcast publisher for orchestration lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: OrchestrationEvent) {
        tracing::trace!(
            event = event.name(),
            execution_id = %event.execution_id(),
            "Publishing orchestration event"
        );

        // send() only fails when nobody is subscribed, which is fine
        let _ = self.sender.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = OrchestrationEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(system::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
