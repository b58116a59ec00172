use crate::constants::status_groups;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Dependencies satisfied, waiting in the ready queue
    #[default]
    Queued,
    /// Handler invocation in flight
    Running,
    /// Parked by an execution pause
    Paused,
    /// Handler returned successfully
    Completed,
    /// Handler failed permanently, or an upstream step did
    Failed,
    /// Execution was cancelled before the task finished
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        status_groups::TASK_FINAL_STATES.contains(self)
    }

    /// Check if this is an active state (task is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this task satisfies dependencies for its successors
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Execution state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    /// Check if this is a terminal state (pause and resume are rejected)
    pub fn is_terminal(&self) -> bool {
        status_groups::EXECUTION_FINAL_STATES.contains(self)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal_check() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
    }

    #[test]
    fn test_task_dependency_satisfaction() {
        assert!(TaskState::Completed.satisfies_dependencies());
        assert!(!TaskState::Paused.satisfies_dependencies());
        assert!(!TaskState::Failed.satisfies_dependencies());
        assert!(!TaskState::Cancelled.satisfies_dependencies());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(TaskState::Running.to_string(), "running");
        assert_eq!("paused".parse::<TaskState>().unwrap(), TaskState::Paused);
        assert!("in_progress".parse::<TaskState>().is_err());

        assert_eq!(ExecutionState::Cancelled.to_string(), "cancelled");
        assert_eq!(
            "completed".parse::<ExecutionState>().unwrap(),
            ExecutionState::Completed
        );
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&TaskState::Queued).unwrap();
        assert_eq!(json, "\"queued\"");

        let parsed: ExecutionState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, ExecutionState::Paused);
    }
}
