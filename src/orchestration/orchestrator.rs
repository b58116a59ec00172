//! # Orchestrator
//!
//! Owns templates, executions, and the dispatcher that moves ready tasks onto step handlers.
//!
//! ## Architecture
//!
//! - One dispatcher task wakes on a [`Notify`] poke (new execution, control call, finished
//!   handler) or a fallback tick, and drains ready tasks while permits remain.
//! - A single [`Semaphore`] caps running handlers across every execution.
//! - Each handler invocation runs on its own spawned task, off the control path.
//! - A reaper task evicts settled executions once their retention period lapses.
//!
//! ## Usage
//!
//! ```rust
//! use propflow_core::config::OrchestratorConfig;
//! use propflow_core::models::{PackageTemplate, Parameters, StepDefinition};
//! use propflow_core::orchestration::{Orchestrator, StepRegistry};
//! use propflow_core::state_machine::ExecutionState;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let registry = StepRegistry::new();
//! registry.register_fn("noop", |params, _ctx| async move { Ok(params) });
//!
//! let orchestrator = Orchestrator::new(OrchestratorConfig::for_testing(), registry).unwrap();
//! orchestrator
//!     .register_template(
//!         PackageTemplate::new("quick_check")
//!             .with_step(StepDefinition::new("inspect", "noop"))
//!             .with_step(StepDefinition::new("report", "noop").depends_on(["inspect"])),
//!     )
//!     .unwrap();
//!
//! let execution_id = orchestrator.execute("quick_check", Parameters::new()).unwrap();
//! let snapshot = orchestrator
//!     .wait_for_completion(execution_id, Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! assert_eq!(snapshot.status, ExecutionState::Completed);
//! orchestrator.shutdown().await;
//! # });
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::logging::log_execution_operation;
use crate::models::{PackageTemplate, Parameters};
use crate::orchestration::execution::{Dispatch, ExecutionHandle};
use crate::orchestration::registry::StepRegistry;
use crate::orchestration::status::{ExecutionSnapshot, ExecutionSummary};
use crate::orchestration::step_executor::StepExecutor;
use crate::orchestration::template_registry::TemplateRegistry;
use crate::packages;
use crate::state_machine::ControlAction;

/// State shared between the public handle and the background loops
struct OrchestratorCore {
    config: Arc<OrchestratorConfig>,
    executor: StepExecutor,
    templates: TemplateRegistry,
    executions: DashMap<Uuid, Arc<ExecutionHandle>>,
    publisher: EventPublisher,
    permits: Arc<Semaphore>,
    wake: Notify,
    sequence: Arc<AtomicU64>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

pub struct Orchestrator {
    core: Arc<OrchestratorCore>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an orchestrator; background loops start on first use or via [`Orchestrator::start`]
    pub fn new(config: OrchestratorConfig, registry: StepRegistry) -> OrchestrationResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);

        let core = OrchestratorCore {
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            publisher: EventPublisher::new(config.event_channel_capacity),
            config: Arc::new(config),
            executor: StepExecutor::new(registry),
            templates: TemplateRegistry::new(),
            executions: DashMap::new(),
            wake: Notify::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            running: AtomicBool::new(false),
            shutdown,
        };

        Ok(Self {
            core: Arc::new(core),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the dispatcher and reaper on the current tokio runtime; repeat calls are no-ops
    ///
    /// Fails with [`OrchestrationError::Configuration`] when called outside a runtime.
    pub fn start(&self) -> OrchestrationResult<()> {
        let runtime = Handle::try_current().map_err(|err| {
            OrchestrationError::Configuration(format!("Orchestrator needs a tokio runtime: {err}"))
        })?;
        if self.core.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.core.shutdown.send_replace(false);

        let dispatcher = runtime.spawn(run_dispatcher(
            Arc::clone(&self.core),
            self.core.shutdown.subscribe(),
        ));
        let reaper = runtime.spawn(run_reaper(
            Arc::clone(&self.core),
            self.core.shutdown.subscribe(),
        ));
        self.background.lock().extend([dispatcher, reaper]);

        info!(
            max_concurrency = self.core.config.max_concurrency,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop the background loops and wait for them to exit
    ///
    /// In-flight handler invocations are not interrupted.
    pub async fn shutdown(&self) {
        self.core.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Orchestrator background task ended abnormally");
            }
        }
        self.core.running.store(false, Ordering::SeqCst);
        info!("Orchestrator shut down");
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.core.config
    }

    pub fn registry(&self) -> &StepRegistry {
        self.core.executor.registry()
    }

    /// Validate and register a template; a rejected template leaves no trace
    pub fn register_template(&self, template: PackageTemplate) -> OrchestrationResult<()> {
        self.core.templates.register(template).map(|_| ())
    }

    /// Register every built-in package template, returning how many were registered
    pub fn register_builtin_packages(&self) -> OrchestrationResult<usize> {
        let templates = packages::builtin_templates()?;
        let count = templates.len();
        for template in templates {
            self.register_template(template)?;
        }
        Ok(count)
    }

    pub fn template_names(&self) -> Vec<String> {
        self.core.templates.names()
    }

    /// Start an execution of `template_name`
    ///
    /// Must be called within a tokio runtime; outside one this returns
    /// [`OrchestrationError::Configuration`] and nothing is created.
    #[instrument(skip(self, parameters))]
    pub fn execute(
        &self,
        template_name: &str,
        parameters: Parameters,
    ) -> OrchestrationResult<Uuid> {
        let template = self.core.templates.get(template_name)?;

        let missing = template.template.missing_parameters(&parameters);
        if !missing.is_empty() {
            return Err(OrchestrationError::MissingParameters {
                template: template_name.to_string(),
                missing,
            });
        }

        self.start()?;

        let handle = ExecutionHandle::start(
            template,
            parameters,
            Arc::clone(&self.core.config),
            Arc::clone(&self.core.sequence),
            self.core.publisher.clone(),
        )?;
        let execution_id = handle.execution_id();

        self.core.executions.insert(execution_id, handle);
        self.core.wake.notify_one();

        Ok(execution_id)
    }

    pub fn status(&self, execution_id: Uuid) -> OrchestrationResult<ExecutionSnapshot> {
        Ok(self.handle(execution_id)?.snapshot())
    }

    /// Pause, resume, or cancel an execution
    #[instrument(skip(self))]
    pub fn control(
        &self,
        execution_id: Uuid,
        action: ControlAction,
        reason: Option<String>,
    ) -> OrchestrationResult<()> {
        self.handle(execution_id)?.control(action, reason)?;
        self.core.wake.notify_one();
        Ok(())
    }

    /// [`Orchestrator::control`] with the action given by name (`pause`, `resume`, `cancel`)
    pub fn control_named(
        &self,
        execution_id: Uuid,
        action: &str,
        reason: Option<String>,
    ) -> OrchestrationResult<()> {
        let handle = self.handle(execution_id)?;
        let action: ControlAction = action
            .parse()
            .map_err(|_| OrchestrationError::invalid_transition(handle.status(), action))?;
        self.control(execution_id, action, reason)
    }

    /// Wait until the execution has no queued, running, or paused task
    pub async fn wait_for_completion(
        &self,
        execution_id: Uuid,
        timeout: Duration,
    ) -> OrchestrationResult<ExecutionSnapshot> {
        let handle = self.handle(execution_id)?;
        let mut settled = handle.settled_receiver();

        let waited = tokio::time::timeout(timeout, settled.wait_for(|done| *done))
            .await
            .map(|settled| settled.map(|_| ()));

        match waited {
            Ok(Ok(())) => Ok(handle.snapshot()),
            Ok(Err(_)) => Err(OrchestrationError::Internal(format!(
                "settlement channel closed for execution {execution_id}"
            ))),
            Err(_) => Err(OrchestrationError::Timeout(format!(
                "execution {execution_id} did not settle within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Summaries of every retained execution, oldest first
    pub fn list_executions(&self) -> Vec<ExecutionSummary> {
        let mut summaries: Vec<ExecutionSummary> = self
            .core
            .executions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.core.publisher.subscribe()
    }

    /// Evict settled executions older than the retention period, returning how many went
    pub fn reap_expired(&self) -> usize {
        self.core.reap_expired(Instant::now())
    }

    /// Handler permits not currently held by a running task
    pub fn available_permits(&self) -> usize {
        self.core.permits.available_permits()
    }

    fn handle(&self, execution_id: Uuid) -> OrchestrationResult<Arc<ExecutionHandle>> {
        self.core
            .executions
            .get(&execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestrationError::execution_not_found(execution_id))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Background loops hold the core; tell them to exit
        self.core.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executions", &self.core.executions.len())
            .field("templates", &self.core.templates.len())
            .field("available_permits", &self.core.permits.available_permits())
            .finish()
    }
}

impl OrchestratorCore {
    /// Dispatch ready tasks, best rank across all executions first, until permits or
    /// ready tasks run out.
    fn dispatch_ready(self: &Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                return;
            };

            let now = Instant::now();
            let best = self
                .executions
                .iter()
                .filter_map(|entry| {
                    entry
                        .value()
                        .peek_ready(now)
                        .map(|rank| (rank, Arc::clone(entry.value())))
                })
                .max_by(|a, b| a.0.cmp(&b.0));

            let Some((_, handle)) = best else {
                return;
            };

            match handle.take_ready() {
                Ok(Some(dispatch)) => self.spawn_invocation(handle, dispatch, permit),
                // Paused or cancelled between peek and take
                Ok(None) => {}
                Err(err) => {
                    error!(
                        execution_id = %handle.execution_id(),
                        error = %err,
                        "Failed to dispatch ready task"
                    );
                    return;
                }
            }
        }
    }

    fn spawn_invocation(
        self: &Arc<Self>,
        handle: Arc<ExecutionHandle>,
        dispatch: Dispatch,
        permit: OwnedSemaphorePermit,
    ) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = core.executor.execute(&dispatch).await;

            if let Err(err) =
                handle.complete_dispatch(dispatch.task_id, dispatch.attempt(), outcome)
            {
                error!(
                    execution_id = %dispatch.execution_id,
                    step_id = %dispatch.step_id,
                    error = %err,
                    "Failed to record step outcome"
                );
            }

            drop(permit);
            core.wake.notify_one();
        });
    }

    fn reap_expired(&self, now: Instant) -> usize {
        let ttl = self.config.retention_ttl();
        let expired: Vec<Uuid> = self
            .executions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .settled_at()
                    .is_some_and(|settled_at| now.saturating_duration_since(settled_at) >= ttl)
            })
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for execution_id in expired {
            if let Some((_, handle)) = self.executions.remove(&execution_id) {
                evicted += 1;
                log_execution_operation(
                    "evict",
                    execution_id,
                    handle.package_name(),
                    &handle.status().to_string(),
                    None,
                );
                self.publisher.publish(OrchestrationEvent::ExecutionEvicted {
                    execution_id,
                    package_name: handle.package_name().to_string(),
                });
            }
        }
        evicted
    }
}

async fn run_dispatcher(core: Arc<OrchestratorCore>, mut shutdown: watch::Receiver<bool>) {
    let tick = core.config.dispatch_tick();
    debug!(tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX), "Dispatcher running");

    while !*shutdown.borrow() {
        core.dispatch_ready();

        tokio::select! {
            () = core.wake.notified() => {}
            () = tokio::time::sleep(tick) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Dispatcher stopped");
}

async fn run_reaper(core: Arc<OrchestratorCore>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(core.config.reaper_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = core.reap_expired(Instant::now());
                if evicted > 0 {
                    debug!(evicted = evicted, "Evicted expired executions");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
