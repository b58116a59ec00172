#![allow(dead_code)]

pub mod strategies;

use parking_lot::Mutex;
use propflow_core::{
    HandlerError, Orchestrator, OrchestratorConfig, OrchestrationEvent, PackageTemplate,
    Parameters, StepRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// What a recording handler observed, in invocation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Started { step_id: String, attempt: u32 },
    Finished { step_id: String },
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<Invocation>,
    running: usize,
    peak: usize,
}

/// Shared log of handler starts and finishes, with a running-concurrency high-water mark
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    state: Arc<Mutex<LogState>>,
}

impl InvocationLog {
    fn started(&self, step_id: &str, attempt: u32) {
        let mut state = self.state.lock();
        state.entries.push(Invocation::Started {
            step_id: step_id.to_string(),
            attempt,
        });
        state.running += 1;
        state.peak = state.peak.max(state.running);
    }

    fn finished(&self, step_id: &str) {
        let mut state = self.state.lock();
        state.entries.push(Invocation::Finished {
            step_id: step_id.to_string(),
        });
        state.running -= 1;
    }

    fn abandoned(&self) {
        self.state.lock().running -= 1;
    }

    pub fn entries(&self) -> Vec<Invocation> {
        self.state.lock().entries.clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.state.lock().peak
    }

    /// Step ids in the order their handlers started
    pub fn start_order(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Invocation::Started { step_id, .. } => Some(step_id),
                Invocation::Finished { .. } => None,
            })
            .collect()
    }

    pub fn attempts_of(&self, step_id: &str) -> usize {
        self.start_order().iter().filter(|s| *s == step_id).count()
    }

    pub fn position(&self, entry: &Invocation) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Whether `first` finished before `second` started
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        let finished = self.position(&Invocation::Finished {
            step_id: first.to_string(),
        });
        let started = self
            .entries()
            .iter()
            .position(|e| matches!(e, Invocation::Started { step_id, .. } if step_id == second));
        matches!((finished, started), (Some(f), Some(s)) if f < s)
    }
}

/// Register a handler that sleeps for `delay`, then echoes its step id
///
/// The sleep ends early when the execution is cancelled.
pub fn register_recording(
    registry: &StepRegistry,
    handler_type: &str,
    delay: Duration,
    log: &InvocationLog,
) {
    let log = log.clone();
    registry.register_fn(handler_type, move |_params, context| {
        let log = log.clone();
        async move {
            log.started(&context.step_id, context.attempt);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = context.cancellation.cancelled() => {
                    log.abandoned();
                    return Err(HandlerError::permanent("cancelled"));
                }
            }
            log.finished(&context.step_id);

            let mut output = Parameters::new();
            output.insert("step".into(), json!(context.step_id));
            Ok(output)
        }
    });
}

/// Register a handler that fails its first `failures` attempts, then succeeds
pub fn register_flaky(
    registry: &StepRegistry,
    handler_type: &str,
    failures: u32,
    log: &InvocationLog,
) {
    let log = log.clone();
    registry.register_fn(handler_type, move |_params, context| {
        let log = log.clone();
        async move {
            log.started(&context.step_id, context.attempt);
            log.finished(&context.step_id);
            if context.attempt <= failures {
                return Err(HandlerError::new(format!(
                    "attempt {} rejected",
                    context.attempt
                )));
            }
            Ok(Parameters::new())
        }
    });
}

/// Register a handler that always fails with a retryable error
pub fn register_failing(registry: &StepRegistry, handler_type: &str, log: &InvocationLog) {
    register_flaky(registry, handler_type, u32::MAX, log);
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::for_testing()
}

pub fn orchestrator_with(
    config: OrchestratorConfig,
    registry: StepRegistry,
    templates: impl IntoIterator<Item = PackageTemplate>,
) -> Orchestrator {
    let orchestrator = Orchestrator::new(config, registry).expect("valid test config");
    for template in templates {
        orchestrator
            .register_template(template)
            .expect("valid test template");
    }
    orchestrator
}

/// Every event received so far, without waiting
pub fn drain_events(
    receiver: &mut broadcast::Receiver<OrchestrationEvent>,
) -> Vec<OrchestrationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Event names in publication order
pub fn event_names(events: &[OrchestrationEvent]) -> Vec<&'static str> {
    events.iter().map(OrchestrationEvent::name).collect()
}

pub const WAIT: Duration = Duration::from_secs(5);
