use super::{events::TaskEvent, states::TaskState};
use crate::error::{OrchestrationError, OrchestrationResult};

/// Transition table for a single task.
///
/// The scheduler owns the task data; this type only decides whether a move is legal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Apply `event` to `current_state`, returning the target state.
    pub fn transition(
        current_state: TaskState,
        event: TaskEvent,
    ) -> OrchestrationResult<TaskState> {
        Self::determine_target_state(current_state, event)
    }

    /// Check a transition without applying it
    pub fn can_transition(current_state: TaskState, event: TaskEvent) -> bool {
        Self::determine_target_state(current_state, event).is_ok()
    }

    fn determine_target_state(
        current_state: TaskState,
        event: TaskEvent,
    ) -> OrchestrationResult<TaskState> {
        let target = match (current_state, event) {
            // Dispatch
            (TaskState::Queued, TaskEvent::Start) => TaskState::Running,

            // Handler outcomes, applied directly or after a resume released a parked result
            (TaskState::Running | TaskState::Paused, TaskEvent::Complete) => TaskState::Completed,
            (TaskState::Running | TaskState::Paused, TaskEvent::Fail) => TaskState::Failed,
            (TaskState::Running | TaskState::Paused, TaskEvent::Retry) => TaskState::Queued,

            // Upstream failure reaching a task that never ran
            (TaskState::Queued, TaskEvent::Fail) => TaskState::Failed,

            // Pause / resume
            (TaskState::Running, TaskEvent::Pause) => TaskState::Paused,
            (TaskState::Paused, TaskEvent::Resume) => TaskState::Queued,
            (TaskState::Paused, TaskEvent::ResumeInFlight) => TaskState::Running,

            // Cancel from any non-terminal state
            (from, TaskEvent::Cancel) if !from.is_terminal() => TaskState::Cancelled,

            (from_state, event) => {
                return Err(OrchestrationError::invalid_transition(
                    from_state,
                    event.event_type(),
                ))
            }
        };

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = TaskStateMachine::transition(TaskState::Queued, TaskEvent::Start).unwrap();
        assert_eq!(state, TaskState::Running);
        let state = TaskStateMachine::transition(state, TaskEvent::Complete).unwrap();
        assert_eq!(state, TaskState::Completed);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let paused = TaskStateMachine::transition(TaskState::Running, TaskEvent::Pause).unwrap();
        assert_eq!(paused, TaskState::Paused);
        assert_eq!(
            TaskStateMachine::transition(paused, TaskEvent::Resume).unwrap(),
            TaskState::Queued
        );
        assert_eq!(
            TaskStateMachine::transition(paused, TaskEvent::ResumeInFlight).unwrap(),
            TaskState::Running
        );
    }

    #[test]
    fn test_cancel_only_from_non_terminal_states() {
        for state in [TaskState::Queued, TaskState::Running, TaskState::Paused] {
            assert_eq!(
                TaskStateMachine::transition(state, TaskEvent::Cancel).unwrap(),
                TaskState::Cancelled
            );
        }
        for state in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(!TaskStateMachine::can_transition(state, TaskEvent::Cancel));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!TaskStateMachine::can_transition(TaskState::Queued, TaskEvent::Complete));
        assert!(!TaskStateMachine::can_transition(TaskState::Queued, TaskEvent::Pause));
        assert!(!TaskStateMachine::can_transition(TaskState::Completed, TaskEvent::Start));

        let err = TaskStateMachine::transition(TaskState::Failed, TaskEvent::Retry).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
    }

    #[test]
    fn test_retry_returns_to_queue() {
        assert_eq!(
            TaskStateMachine::transition(TaskState::Running, TaskEvent::Retry).unwrap(),
            TaskState::Queued
        );
    }
}
