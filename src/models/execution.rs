use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Parameters, Task};
use crate::state_machine::{ExecutionState, ExecutionStateMachine, TaskState, TaskTally};

/// Execution is one running instance of a package template
///
/// Tasks are kept in materialization order. Steps whose predecessors have not all
/// completed have no task yet.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub package_name: String,
    pub parameters: Parameters,
    pub status: ExecutionState,
    pub tasks: Vec<Task>,
    /// Number of steps in the template
    pub total_task_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused: bool,
    pub cancelled: bool,
    pub pause_reason: Option<String>,
    pub cancel_reason: Option<String>,
    #[serde(skip)]
    task_index: HashMap<String, usize>,
}

impl Execution {
    pub fn new(
        package_name: impl Into<String>,
        parameters: Parameters,
        total_task_count: usize,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            package_name: package_name.into(),
            parameters,
            status: ExecutionState::Running,
            tasks: Vec::with_capacity(total_task_count),
            total_task_count,
            started_at: Utc::now(),
            completed_at: None,
            paused: false,
            cancelled: false,
            pause_reason: None,
            cancel_reason: None,
            task_index: HashMap::with_capacity(total_task_count),
        }
    }

    /// Append a newly materialized task; a step is materialized at most once
    pub fn insert_task(&mut self, task: Task) -> usize {
        if let Some(&index) = self.task_index.get(&task.step_definition_id) {
            return index;
        }
        let index = self.tasks.len();
        self.task_index.insert(task.step_definition_id.clone(), index);
        self.tasks.push(task);
        index
    }

    pub fn is_materialized(&self, step_id: &str) -> bool {
        self.task_index.contains_key(step_id)
    }

    pub fn task_position(&self, step_id: &str) -> Option<usize> {
        self.task_index.get(step_id).copied()
    }

    pub fn task(&self, step_id: &str) -> Option<&Task> {
        self.task_position(step_id).map(|i| &self.tasks[i])
    }

    pub fn task_mut(&mut self, step_id: &str) -> Option<&mut Task> {
        self.task_position(step_id).map(move |i| &mut self.tasks[i])
    }

    pub fn task_by_id(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Whether the step has a Completed task
    pub fn step_completed(&self, step_id: &str) -> bool {
        self.task(step_id)
            .is_some_and(|t| t.status.satisfies_dependencies())
    }

    pub fn count_in(&self, status: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn tally(&self) -> TaskTally {
        TaskTally {
            total_steps: self.total_task_count,
            completed: self.count_in(TaskState::Completed),
            failed: self.count_in(TaskState::Failed),
        }
    }

    /// Re-derive the status, returning the previous status when it changed
    pub fn refresh_status(&mut self) -> Option<ExecutionState> {
        let derived = ExecutionStateMachine::derive(self.tally(), self.paused, self.cancelled);
        if derived == self.status {
            return None;
        }
        let previous = self.status;
        self.status = derived;
        Some(previous)
    }

    /// No task is queued, running, or paused and the status is terminal
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() && self.tasks.iter().all(Task::is_terminal)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_task_count == 0 {
            return 0.0;
        }
        self.count_in(TaskState::Completed) as f64 / self.total_task_count as f64 * 100.0
    }
}
