// State machine module for task and execution lifecycles
//
// Transitions are pure functions over state enums; the scheduler holds the data and
// consults these tables before mutating it.

pub mod events;
pub mod execution_state_machine;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use events::{ControlAction, TaskEvent};
pub use execution_state_machine::{ExecutionStateMachine, TaskTally};
pub use states::{ExecutionState, TaskState};
pub use task_state_machine::TaskStateMachine;
