use super::{events::ControlAction, states::ExecutionState};
use crate::error::{OrchestrationError, OrchestrationResult};

/// Aggregate task counts feeding the execution status derivation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTally {
    pub total_steps: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Execution status rules.
///
/// Status is a pure function of the task tally plus the pause and cancel flags, so it is
/// recomputed after every task transition rather than stored independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionStateMachine;

impl ExecutionStateMachine {
    /// Derive the execution status: any failed task wins, then cancellation, then completion.
    pub fn derive(tally: TaskTally, paused: bool, cancelled: bool) -> ExecutionState {
        if tally.failed > 0 {
            ExecutionState::Failed
        } else if cancelled {
            ExecutionState::Cancelled
        } else if tally.total_steps > 0 && tally.completed == tally.total_steps {
            ExecutionState::Completed
        } else if paused {
            ExecutionState::Paused
        } else {
            ExecutionState::Running
        }
    }

    /// Validate a control action against the current status.
    ///
    /// Returns `Ok(false)` when the action is an accepted no-op (cancelling a terminal execution).
    pub fn check_control(
        current: ExecutionState,
        action: ControlAction,
    ) -> OrchestrationResult<bool> {
        match (current, action) {
            (ExecutionState::Running, ControlAction::Pause) => Ok(true),
            (ExecutionState::Paused, ControlAction::Resume) => Ok(true),
            (ExecutionState::Running | ExecutionState::Paused, ControlAction::Cancel) => Ok(true),
            (state, ControlAction::Cancel) if state.is_terminal() => Ok(false),
            (state, action) => Err(OrchestrationError::invalid_transition(state, action)),
        }
    }
}
