//! # Orchestration Errors
//!
//! Error taxonomy for template registration, step invocation, and execution control.
//!
//! Template validation errors (`UnknownDependency`, `CyclicDependency`, `DuplicateStep`,
//! `InvalidTemplate`) are returned synchronously from registration. Step-level failures are
//! recorded on the task as a [`StepError`] and never escape the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure reported by a step handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// Handlers may mark an error as permanent to skip the remaining retries
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(format!("Serialization error: {err}"))
    }
}

/// Terminal error recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The handler returned an error
    Handler {
        message: String,
        #[serde(default = "default_retryable")]
        retryable: bool,
    },
    /// The handler did not return within the task timeout
    Timeout { timeout_ms: u64 },
    /// No handler was registered for the step's handler type
    UnknownStepType { handler_type: String },
    /// A predecessor failed permanently
    UpstreamFailure { failed_step_id: String },
}

impl StepError {
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::UpstreamFailure { .. })
    }

    /// Whether the scheduler may retry a step that failed with this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::UnknownStepType { .. } | Self::UpstreamFailure { .. } => false,
        }
    }
}

impl From<HandlerError> for StepError {
    fn from(err: HandlerError) -> Self {
        Self::Handler {
            message: err.message,
            retryable: err.retryable,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler { message, .. } => write!(f, "Handler error: {message}"),
            Self::Timeout { timeout_ms } => write!(f, "Handler timed out after {timeout_ms}ms"),
            Self::UnknownStepType { handler_type } => {
                write!(f, "Unknown step type: {handler_type}")
            }
            Self::UpstreamFailure { failed_step_id } => {
                write!(f, "Upstream failure in step '{failed_step_id}'")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error("Unknown step type: {handler_type}")]
    UnknownStepType { handler_type: String },

    #[error("Step '{step_id}' depends on unknown step '{dependency_id}'")]
    UnknownDependency {
        step_id: String,
        dependency_id: String,
    },

    #[error("Cyclic dependency between steps: {}", step_ids.join(" -> "))]
    CyclicDependency { step_ids: Vec<String> },

    #[error("Duplicate step id '{step_id}'")]
    DuplicateStep { step_id: String },

    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Template '{template}' is already registered")]
    DuplicateTemplate { template: String },

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Upstream failure in step '{failed_step_id}'")]
    UpstreamFailure { failed_step_id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: cannot {action} from {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Missing required parameters for '{template}': {}", missing.join(", "))]
    MissingParameters {
        template: String,
        missing: Vec<String>,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    pub fn execution_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "Execution",
            id: id.to_string(),
        }
    }

    pub fn template_not_found(name: impl ToString) -> Self {
        Self::NotFound {
            entity: "Template",
            id: name.to_string(),
        }
    }

    pub fn invalid_transition(from: impl ToString, action: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    /// Whether the error came from template validation.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::DuplicateStep { .. }
                | Self::InvalidTemplate { .. }
        )
    }
}

impl From<StepError> for OrchestrationError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Handler { message, retryable } => {
                Self::Handler(HandlerError { message, retryable })
            }
            StepError::Timeout { timeout_ms } => {
                Self::Timeout(format!("step handler exceeded {timeout_ms}ms"))
            }
            StepError::UnknownStepType { handler_type } => Self::UnknownStepType { handler_type },
            StepError::UpstreamFailure { failed_step_id } => {
                Self::UpstreamFailure { failed_step_id }
            }
        }
    }
}

impl From<config::ConfigError> for OrchestrationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestrationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(format!("YAML parse error: {err}"))
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(format!("JSON parse error: {err}"))
    }
}

pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;
