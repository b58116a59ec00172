//! # Status Reporting
//!
//! Point-in-time snapshots of executions and their tasks. Snapshots are plain serializable
//! copies, so callers can persist them (one record per execution, one per task keyed by
//! `(execution_id, step_id)`) without holding any scheduler lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StepError;
use crate::models::{Execution, Parameters, Task};
use crate::state_machine::{ExecutionState, TaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub name: String,
    pub handler_type: String,
    pub status: TaskState,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub attempts: u32,
    pub output: Option<Parameters>,
    pub error: Option<StepError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            execution_id: task.execution_id,
            step_id: task.step_definition_id.clone(),
            name: task.name.clone(),
            handler_type: task.handler_type.clone(),
            status: task.status,
            priority: task.priority,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            attempts: task.attempts,
            output: task.output.clone(),
            error: task.error.clone(),
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            duration_ms: task.duration().map(duration_millis),
        }
    }
}

/// A failed task and why it failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub step_id: String,
    pub name: String,
    pub error: StepError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: Uuid,
    pub package_name: String,
    pub status: ExecutionState,
    pub progress_percent: f64,
    pub total_task_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    pub queued_count: usize,
    /// Names of tasks whose handler is currently running
    pub running_tasks: Vec<String>,
    /// Average completed-task duration times the remaining step count
    pub estimated_remaining_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// No task is queued, running, or paused
    pub settled: bool,
    pub pause_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub tasks: Vec<TaskSnapshot>,
    pub failures: Vec<TaskFailure>,
}

impl ExecutionSnapshot {
    pub fn capture(execution: &Execution) -> Self {
        let completed_count = execution.count_in(TaskState::Completed);

        let running_tasks = execution
            .tasks
            .iter()
            .filter(|t| t.status == TaskState::Running)
            .map(|t| t.name.clone())
            .collect();

        let failures = execution
            .tasks
            .iter()
            .filter(|t| t.status == TaskState::Failed)
            .filter_map(|t| {
                t.error.as_ref().map(|error| TaskFailure {
                    step_id: t.step_definition_id.clone(),
                    name: t.name.clone(),
                    error: error.clone(),
                })
            })
            .collect();

        Self {
            execution_id: execution.execution_id,
            package_name: execution.package_name.clone(),
            status: execution.status,
            progress_percent: execution.progress_percent(),
            total_task_count: execution.total_task_count,
            completed_count,
            failed_count: execution.count_in(TaskState::Failed),
            cancelled_count: execution.count_in(TaskState::Cancelled),
            queued_count: execution.count_in(TaskState::Queued),
            running_tasks,
            estimated_remaining_ms: estimate_remaining(execution, completed_count)
                .map(duration_millis),
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            settled: execution.is_settled(),
            pause_reason: execution.pause_reason.clone(),
            cancel_reason: execution.cancel_reason.clone(),
            tasks: execution.tasks.iter().map(TaskSnapshot::from).collect(),
            failures,
        }
    }

    pub fn task(&self, step_id: &str) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.step_id == step_id)
    }

    pub fn estimated_remaining(&self) -> Option<Duration> {
        self.estimated_remaining_ms.map(Duration::from_millis)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Compact view used when listing executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub package_name: String,
    pub status: ExecutionState,
    pub progress_percent: f64,
    pub settled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.execution_id,
            package_name: execution.package_name.clone(),
            status: execution.status,
            progress_percent: execution.progress_percent(),
            settled: execution.is_settled(),
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}

fn estimate_remaining(execution: &Execution, completed_count: usize) -> Option<Duration> {
    if completed_count == 0 {
        return None;
    }

    let total: Duration = execution
        .tasks
        .iter()
        .filter(|t| t.status == TaskState::Completed)
        .filter_map(Task::duration)
        .sum();

    let remaining_steps = execution.total_task_count.saturating_sub(completed_count);
    let average = total / u32::try_from(completed_count).unwrap_or(u32::MAX);
    Some(average * u32::try_from(remaining_steps).unwrap_or(u32::MAX))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
