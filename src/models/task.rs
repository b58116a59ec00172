use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{OrchestrationResult, StepError};
use crate::models::{Parameters, StepDefinition};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};

/// Result of one handler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded(Parameters),
    Failed(StepError),
}

/// Task is one schedulable occurrence of a step within an execution
///
/// Owned by its execution and mutated only by the scheduler, always through
/// [`Task::apply`] so every status change passes the transition table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub step_definition_id: String,
    pub name: String,
    pub handler_type: String,
    pub parameters: Parameters,
    pub priority: i32,
    /// Global creation order, the FIFO tie-breaker between equal priorities
    pub sequence: u64,
    pub status: TaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    /// Number of handler invocations started
    pub attempts: u32,
    pub output: Option<Parameters>,
    pub error: Option<StepError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether a handler invocation for the current attempt has not returned yet
    #[serde(skip)]
    pub(crate) in_flight: bool,
    /// Outcome that arrived while the execution was paused, applied on resume
    #[serde(skip)]
    pub(crate) parked_outcome: Option<StepOutcome>,
}

impl Task {
    /// Materialize a ready task
    pub fn new(
        execution_id: Uuid,
        step: &StepDefinition,
        parameters: Parameters,
        max_retries: u32,
        timeout: Duration,
        sequence: u64,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            execution_id,
            step_definition_id: step.id.clone(),
            name: step.name.clone(),
            handler_type: step.handler_type.clone(),
            parameters,
            priority: step.priority,
            sequence,
            status: TaskState::Queued,
            retry_count: 0,
            max_retries,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            attempts: 0,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            in_flight: false,
            parked_outcome: None,
        }
    }

    /// Materialize a task that can never run because `failed_step_id` failed
    pub fn upstream_failed(
        execution_id: Uuid,
        step: &StepDefinition,
        failed_step_id: &str,
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            execution_id,
            step_definition_id: step.id.clone(),
            name: step.name.clone(),
            handler_type: step.handler_type.clone(),
            parameters: step.default_parameters.clone(),
            priority: step.priority,
            sequence,
            status: TaskState::Failed,
            retry_count: 0,
            max_retries: 0,
            timeout_ms: 0,
            attempts: 0,
            output: None,
            error: Some(StepError::UpstreamFailure {
                failed_step_id: failed_step_id.to_string(),
            }),
            created_at: now,
            started_at: None,
            completed_at: Some(now),
            in_flight: false,
            parked_outcome: None,
        }
    }

    /// Apply a lifecycle event, updating status, counters, and timestamps
    pub fn apply(&mut self, event: TaskEvent) -> OrchestrationResult<TaskState> {
        let target = TaskStateMachine::transition(self.status, event)?;

        match event {
            TaskEvent::Start => {
                self.attempts += 1;
                self.in_flight = true;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskEvent::Retry => {
                self.retry_count += 1;
                self.in_flight = false;
            }
            TaskEvent::Complete | TaskEvent::Fail | TaskEvent::Cancel => {
                self.in_flight = false;
                self.parked_outcome = None;
                self.completed_at = Some(Utc::now());
            }
            TaskEvent::Pause | TaskEvent::Resume | TaskEvent::ResumeInFlight => {}
        }

        self.status = target;
        Ok(target)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wall-clock time from first dispatch to completion
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> StepDefinition {
        StepDefinition::new("price", "cma_generation")
            .with_name("Pricing")
            .with_priority(3)
    }

    fn task() -> Task {
        Task::new(
            Uuid::new_v4(),
            &step(),
            Parameters::new(),
            2,
            Duration::from_secs(30),
            7,
        )
    }

    #[test]
    fn test_new_task_is_queued() {
        let task = task();
        assert_eq!(task.status, TaskState::Queued);
        assert_eq!(task.priority, 3);
        assert_eq!(task.sequence, 7);
        assert_eq!(task.name, "Pricing");
        assert_eq!(task.timeout(), Duration::from_secs(30));
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_apply_tracks_timestamps_and_attempts() {
        let mut task = task();
        task.apply(TaskEvent::Start).unwrap();
        assert_eq!(task.attempts, 1);
        assert!(task.in_flight);
        let first_start = task.started_at;

        task.apply(TaskEvent::Retry).unwrap();
        assert_eq!(task.status, TaskState::Queued);
        assert_eq!(task.retry_count, 1);
        assert!(task.can_retry());

        task.apply(TaskEvent::Start).unwrap();
        assert_eq!(task.attempts, 2);
        assert_eq!(task.started_at, first_start);

        task.apply(TaskEvent::Complete).unwrap();
        assert_eq!(task.status, TaskState::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.duration().is_some());
        assert!(!task.in_flight);
    }

    #[test]
    fn test_invalid_apply_leaves_task_untouched() {
        let mut task = task();
        assert!(task.apply(TaskEvent::Complete).is_err());
        assert_eq!(task.status, TaskState::Queued);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_upstream_failed_task() {
        let task = Task::upstream_failed(Uuid::new_v4(), &step(), "analyze", 9);
        assert_eq!(task.status, TaskState::Failed);
        assert!(task.error.as_ref().unwrap().is_upstream_failure());
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let mut output = Parameters::new();
        output.insert("price".into(), json!(525000));
        let json = serde_json::to_value(StepOutcome::Succeeded(output)).unwrap();
        assert_eq!(json["outcome"], "succeeded");
        assert_eq!(json["data"]["price"], 525000);
    }
}
