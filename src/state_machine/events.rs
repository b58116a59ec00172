use serde::{Deserialize, Serialize};
use std::fmt;

/// Events that can trigger task state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// Dispatch the task to a handler
    Start,
    /// Handler returned successfully
    Complete,
    /// Handler failed with no retries left, or an upstream step failed
    Fail,
    /// Handler failed and the task goes back to the ready queue
    Retry,
    /// Execution paused while the task was running
    Pause,
    /// Execution resumed and the task has no invocation in flight
    Resume,
    /// Execution resumed while the task's invocation is still in flight
    ResumeInFlight,
    /// Execution cancelled
    Cancel,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Retry => "retry",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::ResumeInFlight => "resume_in_flight",
            Self::Cancel => "cancel",
        }
    }
}

/// Caller-issued execution control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

impl std::str::FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("Invalid control action: {other}")),
        }
    }
}
