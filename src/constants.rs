//! # System Constants
//!
//! Event names, operational limits, and status groupings shared across the
//! orchestration core.

// Re-export state types for convenience
pub use crate::state_machine::{ExecutionState as ExecutionStatus, TaskState as TaskStatus};

/// Lifecycle event names published on the event bus and used in structured logs
pub mod events {
    // Execution lifecycle events
    pub const EXECUTION_STARTED: &str = "execution.started";
    pub const EXECUTION_PAUSED: &str = "execution.paused";
    pub const EXECUTION_RESUMED: &str = "execution.resumed";
    pub const EXECUTION_COMPLETED: &str = "execution.completed";
    pub const EXECUTION_FAILED: &str = "execution.failed";
    pub const EXECUTION_CANCELLED: &str = "execution.cancelled";
    pub const EXECUTION_EVICTED: &str = "execution.evicted";

    // Task lifecycle events
    pub const TASK_QUEUED: &str = "task.queued";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_PAUSED: &str = "task.paused";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_RETRY_REQUESTED: &str = "task.retry_requested";
    pub const TASK_CANCELLED: &str = "task.cancelled";

    // Registry events
    pub const STEP_HANDLER_REGISTERED: &str = "registry.step_handler_registered";
    pub const TEMPLATE_REGISTERED: &str = "registry.template_registered";
}

/// System-wide limits
pub mod system {
    /// Maximum number of steps in a single package template
    pub const MAX_PACKAGE_STEPS: usize = 1000;

    /// Upper bound on retries a step may declare
    pub const MAX_STEP_RETRIES: u32 = 25;

    /// Default capacity of the orchestration event channel
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
}

/// Status groupings for validation and logic
pub mod status_groups {
    use super::{ExecutionStatus, TaskStatus};

    /// Task statuses that will never change again
    pub const TASK_FINAL_STATES: &[TaskStatus] =
        &[TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled];

    /// Task statuses that still hold scheduler work
    pub const TASK_ACTIVE_STATES: &[TaskStatus] =
        &[TaskStatus::Queued, TaskStatus::Running, TaskStatus::Paused];

    /// Execution statuses that reject pause and resume
    pub const EXECUTION_FINAL_STATES: &[ExecutionStatus] = &[
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_groups_partition_task_states() {
        for state in status_groups::TASK_FINAL_STATES {
            assert!(state.is_terminal());
            assert!(!status_groups::TASK_ACTIVE_STATES.contains(state));
        }
        for state in status_groups::TASK_ACTIVE_STATES {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_execution_final_states_are_terminal() {
        assert!(status_groups::EXECUTION_FINAL_STATES
            .iter()
            .all(|s| s.is_terminal()));
    }
}
