//! # Execution Lifecycle
//!
//! Per-execution scheduling state: the task table, the ready queue, and every transition
//! driven by dispatch, handler outcomes, and caller control actions.
//!
//! All mutation happens under the execution's own mutex, and the lifecycle events an
//! operation produces are published before that mutex is released. Subscribers therefore
//! see each execution's events in the order its transitions happened.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, OrchestrationResult, StepError};
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::logging::{log_execution_operation, log_task_operation};
use crate::models::{Execution, Parameters, StepDefinition, StepOutcome, Task};
use crate::orchestration::ready_queue::{ReadyEntry, ReadyQueue};
use crate::orchestration::status::{ExecutionSnapshot, ExecutionSummary, TaskSnapshot};
use crate::orchestration::step_handler::{CancellationSignal, CancellationTrigger, StepContext};
use crate::orchestration::template_registry::RegisteredTemplate;
use crate::state_machine::{
    ControlAction, ExecutionState, ExecutionStateMachine, TaskEvent, TaskState,
};

/// Ordering key of an execution's best ready task; greater dispatches first
pub type DispatchRank = (i32, std::cmp::Reverse<u64>);

/// Everything needed to run one handler invocation off the scheduler lock
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub step_id: String,
    pub handler_type: String,
    pub parameters: Parameters,
    pub timeout: Duration,
    pub context: StepContext,
}

impl Dispatch {
    pub fn attempt(&self) -> u32 {
        self.context.attempt
    }
}

#[derive(Debug)]
struct ExecutionRecord {
    execution: Execution,
    queue: ReadyQueue,
    settled_at: Option<Instant>,
}

#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: Uuid,
    package_name: String,
    template: Arc<RegisteredTemplate>,
    config: Arc<OrchestratorConfig>,
    sequence: Arc<AtomicU64>,
    record: Mutex<ExecutionRecord>,
    cancellation: CancellationTrigger,
    settled: watch::Sender<bool>,
    publisher: EventPublisher,
}

impl ExecutionHandle {
    /// Create the execution and materialize its root steps
    pub fn start(
        template: Arc<RegisteredTemplate>,
        parameters: Parameters,
        config: Arc<OrchestratorConfig>,
        sequence: Arc<AtomicU64>,
        publisher: EventPublisher,
    ) -> OrchestrationResult<Arc<Self>> {
        let execution = Execution::new(
            template.name(),
            parameters,
            template.template.step_count(),
        );
        let execution_id = execution.execution_id;
        let (cancellation, _) = CancellationSignal::channel();
        let (settled, _) = watch::channel(false);

        let handle = Arc::new(Self {
            execution_id,
            package_name: template.name().to_string(),
            template,
            config,
            sequence,
            record: Mutex::new(ExecutionRecord {
                execution,
                queue: ReadyQueue::new(),
                settled_at: None,
            }),
            cancellation,
            settled,
            publisher,
        });

        let mut events = vec![OrchestrationEvent::ExecutionStarted {
            execution_id,
            package_name: handle.package_name.clone(),
            total_task_count: handle.template.graph.len(),
            at: Utc::now(),
        }];

        {
            let mut record = handle.record.lock();
            for root in handle.template.graph.roots() {
                handle.materialize(&mut record, root, &mut events)?;
            }
            handle.after_change(&mut record, &mut events);
            handle.publisher.publish_all(events);
        }

        log_execution_operation(
            "start",
            execution_id,
            &handle.package_name,
            "running",
            Some(&format!("{} steps", handle.template.graph.len())),
        );

        Ok(handle)
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn status(&self) -> ExecutionState {
        self.record.lock().execution.status
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot::capture(&self.record.lock().execution)
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary::from(&self.record.lock().execution)
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// When the execution settled, if it has
    pub fn settled_at(&self) -> Option<Instant> {
        self.record.lock().settled_at
    }

    /// Receiver that observes `true` once no task is queued, running, or paused
    pub fn settled_receiver(&self) -> watch::Receiver<bool> {
        self.settled.subscribe()
    }

    /// Step ids currently waiting in the ready queue
    pub fn queued_step_ids(&self) -> Vec<String> {
        let record = self.record.lock();
        let mut ids: Vec<String> = record
            .queue
            .step_ids()
            .filter(|id| {
                record
                    .execution
                    .task(id)
                    .is_some_and(|t| t.status == TaskState::Queued)
            })
            .map(str::to_string)
            .collect();
        ids.sort();
        ids
    }

    /// Rank of the next dispatchable task, after promoting due retries
    pub fn peek_ready(&self, now: Instant) -> Option<DispatchRank> {
        let mut record = self.record.lock();
        if !Self::dispatchable(&record) {
            return None;
        }
        record.queue.promote_due(now);
        Self::discard_stale(&mut record);
        record.queue.peek().map(ReadyEntry::rank)
    }

    /// Pop the next ready task and mark it Running
    pub fn take_ready(&self) -> OrchestrationResult<Option<Dispatch>> {
        let mut events = Vec::new();
        let mut record = self.record.lock();
        if !Self::dispatchable(&record) {
            return Ok(None);
        }
        Self::discard_stale(&mut record);
        let Some(entry) = record.queue.pop() else {
            return Ok(None);
        };

        self.transition(&mut record, &entry.step_id, TaskEvent::Start, &mut events)?;

        let task = record
            .execution
            .task(&entry.step_id)
            .ok_or_else(|| missing_task(&entry.step_id))?;

        let dispatch = Dispatch {
            execution_id: self.execution_id,
            task_id: task.task_id,
            step_id: task.step_definition_id.clone(),
            handler_type: task.handler_type.clone(),
            parameters: task.parameters.clone(),
            timeout: task.timeout(),
            context: StepContext {
                execution_id: self.execution_id,
                task_id: task.task_id,
                step_id: task.step_definition_id.clone(),
                attempt: task.attempts,
                cancellation: self.cancellation.signal(),
            },
        };

        self.after_change(&mut record, &mut events);
        self.publisher.publish_all(events);
        Ok(Some(dispatch))
    }

    /// Record the outcome of a handler invocation, returning false if it was discarded
    ///
    /// Outcomes for cancelled tasks or superseded attempts are discarded. Outcomes that
    /// arrive while the execution is paused are parked until resume.
    pub fn complete_dispatch(
        &self,
        task_id: Uuid,
        attempt: u32,
        outcome: StepOutcome,
    ) -> OrchestrationResult<bool> {
        let mut events = Vec::new();
        let mut record = self.record.lock();

        let Some(task) = record
            .execution
            .tasks
            .iter_mut()
            .find(|t| t.task_id == task_id)
        else {
            return Ok(false);
        };

        if !task.in_flight || task.attempts != attempt {
            debug!(
                execution_id = %self.execution_id,
                step_id = %task.step_definition_id,
                status = %task.status,
                "Discarding late step outcome"
            );
            return Ok(false);
        }

        let step_id = task.step_definition_id.clone();
        match task.status {
            TaskState::Running => {
                self.resolve_outcome(&mut record, &step_id, outcome, &mut events)?;
            }
            TaskState::Paused => {
                task.in_flight = false;
                task.parked_outcome = Some(outcome);
                debug!(
                    execution_id = %self.execution_id,
                    step_id = %step_id,
                    "Execution paused, parking step outcome until resume"
                );
            }
            _ => {
                task.in_flight = false;
            }
        }

        self.after_change(&mut record, &mut events);
        self.publisher.publish_all(events);
        Ok(true)
    }

    /// Apply a pause, resume, or cancel request
    pub fn control(
        &self,
        action: ControlAction,
        reason: Option<String>,
    ) -> OrchestrationResult<()> {
        let mut events = Vec::new();
        let requested = reason.clone();
        let mut record = self.record.lock();
        let current = record.execution.status;
        let applies = ExecutionStateMachine::check_control(current, action)?;

        match action {
            ControlAction::Pause => self.pause(&mut record, reason, &mut events)?,
            ControlAction::Resume => self.resume(&mut record, &mut events)?,
            ControlAction::Cancel => {
                // A failed execution may still be draining independent branches
                let draining = current == ExecutionState::Failed && record.settled_at.is_none();
                if !applies && !draining {
                    debug!(
                        execution_id = %self.execution_id,
                        status = %current,
                        "Cancel on a finished execution is a no-op"
                    );
                    return Ok(());
                }
                self.cancel(&mut record, reason, &mut events)?;
            }
        }

        log_execution_operation(
            &action.to_string(),
            self.execution_id,
            &self.package_name,
            &record.execution.status.to_string(),
            control_reason(&record.execution, action, requested.as_deref()),
        );

        self.after_change(&mut record, &mut events);
        self.publisher.publish_all(events);
        Ok(())
    }

    fn pause(
        &self,
        record: &mut ExecutionRecord,
        reason: Option<String>,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        record.execution.paused = true;
        record.execution.pause_reason = reason;

        for step_id in Self::steps_in(record, TaskState::Running) {
            self.transition(record, &step_id, TaskEvent::Pause, events)?;
        }
        Ok(())
    }

    fn resume(
        &self,
        record: &mut ExecutionRecord,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        record.execution.paused = false;
        record.execution.pause_reason = None;

        for step_id in Self::steps_in(record, TaskState::Paused) {
            let task = record
                .execution
                .task_mut(&step_id)
                .ok_or_else(|| missing_task(&step_id))?;

            if let Some(outcome) = task.parked_outcome.take() {
                self.transition(record, &step_id, TaskEvent::ResumeInFlight, events)?;
                self.resolve_outcome(record, &step_id, outcome, events)?;
            } else if task.in_flight {
                self.transition(record, &step_id, TaskEvent::ResumeInFlight, events)?;
            } else {
                self.transition(record, &step_id, TaskEvent::Resume, events)?;
                let entry = Self::entry_for(record, &step_id)?;
                record.queue.push(entry);
            }
        }
        Ok(())
    }

    fn cancel(
        &self,
        record: &mut ExecutionRecord,
        reason: Option<String>,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        record.execution.cancelled = true;
        record.execution.cancel_reason = reason;

        let outstanding: Vec<String> = record
            .execution
            .tasks
            .iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.step_definition_id.clone())
            .collect();

        for step_id in outstanding {
            self.transition(record, &step_id, TaskEvent::Cancel, events)?;
        }

        record.queue.clear();
        self.cancellation.cancel();
        Ok(())
    }

    fn resolve_outcome(
        &self,
        record: &mut ExecutionRecord,
        step_id: &str,
        outcome: StepOutcome,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        match outcome {
            StepOutcome::Succeeded(output) => self.on_success(record, step_id, output, events),
            StepOutcome::Failed(error) => self.on_failure(record, step_id, error, events),
        }
    }

    fn on_success(
        &self,
        record: &mut ExecutionRecord,
        step_id: &str,
        output: Parameters,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        record
            .execution
            .task_mut(step_id)
            .ok_or_else(|| missing_task(step_id))?
            .output = Some(output);
        self.transition(record, step_id, TaskEvent::Complete, events)?;

        let graph = &self.template.graph;
        for successor in graph.successors(step_id) {
            if record.execution.is_materialized(successor) {
                continue;
            }
            let unblocked = graph
                .predecessors(successor)
                .iter()
                .all(|p| record.execution.step_completed(p));
            if unblocked {
                self.materialize(record, successor, events)?;
            }
        }
        Ok(())
    }

    fn on_failure(
        &self,
        record: &mut ExecutionRecord,
        step_id: &str,
        error: StepError,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        let task = record
            .execution
            .task_mut(step_id)
            .ok_or_else(|| missing_task(step_id))?;

        if error.is_retryable() && task.can_retry() {
            let delay = self.config.retry_delay(task.retry_count + 1);
            warn!(
                execution_id = %self.execution_id,
                step_id = %step_id,
                retry = task.retry_count + 1,
                max_retries = task.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Step failed, scheduling retry"
            );
            self.transition(record, step_id, TaskEvent::Retry, events)?;
            let entry = Self::entry_for(record, step_id)?;
            record.queue.push_delayed(entry, Instant::now() + delay);
            return Ok(());
        }

        warn!(
            execution_id = %self.execution_id,
            step_id = %step_id,
            attempts = task.attempts,
            error = %error,
            "Step failed permanently"
        );
        task.error = Some(error);
        self.transition(record, step_id, TaskEvent::Fail, events)?;
        self.propagate_failure(record, step_id, events)
    }

    /// Fail every unfinished transitive successor of `failed_step_id`
    fn propagate_failure(
        &self,
        record: &mut ExecutionRecord,
        failed_step_id: &str,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        let upstream = StepError::UpstreamFailure {
            failed_step_id: failed_step_id.to_string(),
        };

        for descendant in self.template.graph.descendants_of(failed_step_id) {
            match record.execution.task_mut(&descendant) {
                Some(task) if task.is_terminal() => {}
                Some(task) => {
                    task.error = Some(upstream.clone());
                    self.transition(record, &descendant, TaskEvent::Fail, events)?;
                }
                None => {
                    let step = self.step(&descendant)?;
                    let task = Task::upstream_failed(
                        self.execution_id,
                        step,
                        failed_step_id,
                        self.next_sequence(),
                    );
                    log_task_operation(
                        "upstream_failure",
                        self.execution_id,
                        task.task_id,
                        &descendant,
                        "failed",
                        Some(failed_step_id),
                    );
                    events.push(OrchestrationEvent::TaskStatusChanged {
                        execution_id: self.execution_id,
                        from: None,
                        task: TaskSnapshot::from(&task),
                    });
                    record.execution.insert_task(task);
                }
            }
        }
        Ok(())
    }

    /// Create the task for `step_id` and push it onto the ready queue
    fn materialize(
        &self,
        record: &mut ExecutionRecord,
        step_id: &str,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        let step = self.step(step_id)?;
        let parameters = self.merged_parameters(&record.execution, step);
        let max_retries = step.max_retries.unwrap_or(self.config.default_max_retries);
        let timeout = step
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_task_timeout());

        let task = Task::new(
            self.execution_id,
            step,
            parameters,
            max_retries,
            timeout,
            self.next_sequence(),
        );
        let entry = ReadyEntry {
            priority: task.priority,
            sequence: task.sequence,
            step_id: task.step_definition_id.clone(),
        };

        log_task_operation(
            "materialize",
            self.execution_id,
            task.task_id,
            step_id,
            "queued",
            None,
        );
        events.push(OrchestrationEvent::TaskStatusChanged {
            execution_id: self.execution_id,
            from: None,
            task: TaskSnapshot::from(&task),
        });

        record.execution.insert_task(task);
        record.queue.push(entry);
        Ok(())
    }

    /// Step defaults, overridden by execution parameters, then each direct predecessor's
    /// output keyed by the predecessor's step id
    fn merged_parameters(&self, execution: &Execution, step: &StepDefinition) -> Parameters {
        let mut parameters = step.default_parameters.clone();
        for (key, value) in &execution.parameters {
            parameters.insert(key.clone(), value.clone());
        }
        for predecessor in self.template.graph.predecessors(&step.id) {
            if let Some(output) = execution.task(predecessor).and_then(|t| t.output.as_ref()) {
                parameters.insert(predecessor.clone(), Value::Object(output.clone()));
            }
        }
        parameters
    }

    /// Apply `event` to the step's task, logging and recording the change
    fn transition(
        &self,
        record: &mut ExecutionRecord,
        step_id: &str,
        event: TaskEvent,
        events: &mut Vec<OrchestrationEvent>,
    ) -> OrchestrationResult<()> {
        let task = record
            .execution
            .task_mut(step_id)
            .ok_or_else(|| missing_task(step_id))?;
        let from = task.status;
        let to = task.apply(event)?;

        log_task_operation(
            event.event_type(),
            self.execution_id,
            task.task_id,
            step_id,
            &to.to_string(),
            task.error.as_ref().map(ToString::to_string).as_deref(),
        );
        events.push(OrchestrationEvent::TaskStatusChanged {
            execution_id: self.execution_id,
            from: Some(from),
            task: TaskSnapshot::from(&*task),
        });
        Ok(())
    }

    /// Re-derive the execution status and detect settlement
    fn after_change(&self, record: &mut ExecutionRecord, events: &mut Vec<OrchestrationEvent>) {
        if let Some(previous) = record.execution.refresh_status() {
            let current = record.execution.status;
            info!(
                execution_id = %self.execution_id,
                package_name = %self.package_name,
                from = %previous,
                to = %current,
                "Execution status changed"
            );
            events.push(OrchestrationEvent::ExecutionStatusChanged {
                execution_id: self.execution_id,
                from: previous,
                to: current,
                at: Utc::now(),
            });
        }

        if record.settled_at.is_none() && record.execution.is_settled() {
            record.settled_at = Some(Instant::now());
            record.execution.completed_at = Some(Utc::now());
            record.queue.clear();
            self.settled.send_replace(true);

            log_execution_operation(
                "settle",
                self.execution_id,
                &self.package_name,
                &record.execution.status.to_string(),
                Some(&format!(
                    "{}/{} tasks completed",
                    record.execution.count_in(TaskState::Completed),
                    record.execution.total_task_count
                )),
            );
        }
    }

    fn dispatchable(record: &ExecutionRecord) -> bool {
        !record.execution.paused && !record.execution.cancelled && record.settled_at.is_none()
    }

    /// Drop heap heads whose task is no longer Queued
    fn discard_stale(record: &mut ExecutionRecord) {
        while let Some(head) = record.queue.peek() {
            let queued = record
                .execution
                .task(&head.step_id)
                .is_some_and(|t| t.status == TaskState::Queued);
            if queued {
                break;
            }
            record.queue.pop();
        }
    }

    fn steps_in(record: &ExecutionRecord, status: TaskState) -> Vec<String> {
        record
            .execution
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.step_definition_id.clone())
            .collect()
    }

    fn entry_for(record: &ExecutionRecord, step_id: &str) -> OrchestrationResult<ReadyEntry> {
        let task = record
            .execution
            .task(step_id)
            .ok_or_else(|| missing_task(step_id))?;
        Ok(ReadyEntry {
            priority: task.priority,
            sequence: task.sequence,
            step_id: step_id.to_string(),
        })
    }

    fn step(&self, step_id: &str) -> OrchestrationResult<&StepDefinition> {
        self.template
            .template
            .step(step_id)
            .ok_or_else(|| missing_task(step_id))
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// Reason recorded for a control action; resume keeps no reason, so the caller's is logged
fn control_reason<'a>(
    execution: &'a Execution,
    action: ControlAction,
    requested: Option<&'a str>,
) -> Option<&'a str> {
    match action {
        ControlAction::Pause => execution.pause_reason.as_deref(),
        ControlAction::Resume => requested,
        ControlAction::Cancel => execution.cancel_reason.as_deref(),
    }
}

fn missing_task(step_id: &str) -> OrchestrationError {
    OrchestrationError::Internal(format!("no task or step for '{step_id}'"))
}
