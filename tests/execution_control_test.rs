//! Pause, resume, and cancel against running executions.

mod common;

use common::*;
use propflow_core::constants::events;
use propflow_core::{
    ControlAction, ExecutionState, OrchestrationError, OrchestrationEvent, PackageTemplate,
    Parameters, StepDefinition, StepRegistry, TaskState,
};
use std::time::Duration;
use uuid::Uuid;

fn chain() -> PackageTemplate {
    PackageTemplate::new("chain")
        .with_step(StepDefinition::new("inspect", "work"))
        .with_step(StepDefinition::new("appraise", "work").depends_on(["inspect"]))
}

fn wide(count: usize) -> PackageTemplate {
    (0..count).fold(PackageTemplate::new("wide"), |template, index| {
        template.with_step(StepDefinition::new(format!("job_{index}"), "work"))
    })
}

#[tokio::test]
async fn test_pause_holds_successors_until_resume() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(100), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    orchestrator
        .control(id, ControlAction::Pause, Some("seller review".to_string()))
        .unwrap();
    let paused = orchestrator.status(id).unwrap();
    assert_eq!(paused.status, ExecutionState::Paused);
    assert_eq!(paused.pause_reason.as_deref(), Some("seller review"));
    assert_eq!(paused.task("inspect").unwrap().status, TaskState::Paused);

    // The in-flight handler finishes during the pause; nothing new starts
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.start_order(), vec!["inspect"]);
    let still_paused = orchestrator.status(id).unwrap();
    assert_eq!(still_paused.status, ExecutionState::Paused);
    assert!(still_paused.task("appraise").is_none());

    orchestrator.control(id, ControlAction::Resume, None).unwrap();
    let snapshot = orchestrator.wait_for_completion(id, WAIT).await.unwrap();

    assert_eq!(snapshot.status, ExecutionState::Completed);
    assert!(snapshot.pause_reason.is_none());
    assert_eq!(log.start_order(), vec!["inspect", "appraise"]);
}

#[tokio::test]
async fn test_paused_execution_dispatches_nothing_from_its_queue() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(50), &log);
    let config = propflow_core::OrchestratorConfig {
        max_concurrency: 1,
        ..test_config()
    };
    let orchestrator = orchestrator_with(config, registry, [wide(3)]);

    let id = orchestrator.execute("wide", Parameters::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    orchestrator.control(id, ControlAction::Pause, None).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(log.start_order().len(), 1);
    assert_eq!(orchestrator.status(id).unwrap().queued_count, 2);

    orchestrator.control(id, ControlAction::Resume, None).unwrap();
    let snapshot = orchestrator.wait_for_completion(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, ExecutionState::Completed);
    assert_eq!(log.start_order().len(), 3);
}

#[tokio::test]
async fn test_cancel_stops_work_and_is_idempotent() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_secs(30), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);
    let mut receiver = orchestrator.subscribe();

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    orchestrator
        .control(id, ControlAction::Cancel, Some("listing withdrawn".to_string()))
        .unwrap();
    let snapshot = orchestrator.wait_for_completion(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, ExecutionState::Cancelled);
    assert_eq!(snapshot.cancel_reason.as_deref(), Some("listing withdrawn"));
    assert_eq!(snapshot.task("inspect").unwrap().status, TaskState::Cancelled);
    assert!(snapshot.task("appraise").is_none());
    assert!(snapshot.settled);

    orchestrator.control(id, ControlAction::Cancel, None).unwrap();
    let again = orchestrator.status(id).unwrap();
    assert_eq!(again.status, ExecutionState::Cancelled);
    assert_eq!(again.cancel_reason.as_deref(), Some("listing withdrawn"));

    // Let the abandoned invocation unwind, then confirm nothing else ran
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.start_order(), vec!["inspect"]);

    let cancellations = drain_events(&mut receiver)
        .iter()
        .filter(|event| event.name() == events::EXECUTION_CANCELLED)
        .count();
    assert_eq!(cancellations, 1);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(100), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.control(id, ControlAction::Pause, None).unwrap();
    orchestrator.control(id, ControlAction::Cancel, None).unwrap();

    let snapshot = orchestrator.wait_for_completion(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, ExecutionState::Cancelled);
    assert_eq!(snapshot.cancelled_count, 1);
}

#[tokio::test]
async fn test_invalid_control_requests_are_rejected() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(1), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    assert!(matches!(
        orchestrator.control(id, ControlAction::Resume, None),
        Err(OrchestrationError::InvalidTransition { .. })
    ));

    orchestrator.wait_for_completion(id, WAIT).await.unwrap();
    for action in [ControlAction::Pause, ControlAction::Resume] {
        assert!(matches!(
            orchestrator.control(id, action, None),
            Err(OrchestrationError::InvalidTransition { .. })
        ));
    }
    // Cancelling a completed execution changes nothing
    orchestrator.control(id, ControlAction::Cancel, None).unwrap();
    assert_eq!(orchestrator.status(id).unwrap().status, ExecutionState::Completed);

    assert!(matches!(
        orchestrator.control(Uuid::new_v4(), ControlAction::Pause, None),
        Err(OrchestrationError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_named_control_actions() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(100), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    orchestrator.control_named(id, "PAUSE", None).unwrap();
    assert_eq!(orchestrator.status(id).unwrap().status, ExecutionState::Paused);

    let rejected = orchestrator.control_named(id, "rewind", None);
    assert!(matches!(
        rejected,
        Err(OrchestrationError::InvalidTransition { ref from, ref action })
            if from == "paused" && action == "rewind"
    ));

    orchestrator.control_named(id, "resume", None).unwrap();
    orchestrator.control_named(id, "cancel", None).unwrap();
    assert_eq!(orchestrator.status(id).unwrap().status, ExecutionState::Cancelled);
}

#[tokio::test]
async fn test_pause_and_resume_publish_events() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(60), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);
    let mut receiver = orchestrator.subscribe();

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.control(id, ControlAction::Pause, None).unwrap();
    orchestrator.control(id, ControlAction::Resume, None).unwrap();
    orchestrator.wait_for_completion(id, WAIT).await.unwrap();

    let names: Vec<&str> = drain_events(&mut receiver)
        .iter()
        .filter(|event| matches!(event, OrchestrationEvent::ExecutionStatusChanged { .. }))
        .map(OrchestrationEvent::name)
        .collect();
    assert_eq!(
        names,
        vec![
            events::EXECUTION_PAUSED,
            events::EXECUTION_RESUMED,
            events::EXECUTION_COMPLETED
        ]
    );
}

#[tokio::test]
async fn test_wait_times_out_while_paused() {
    let log = InvocationLog::default();
    let registry = StepRegistry::new();
    register_recording(&registry, "work", Duration::from_millis(10), &log);
    let orchestrator = orchestrator_with(test_config(), registry, [chain()]);

    let id = orchestrator.execute("chain", Parameters::new()).unwrap();
    orchestrator.control(id, ControlAction::Pause, None).unwrap();

    let waited = orchestrator
        .wait_for_completion(id, Duration::from_millis(100))
        .await;
    assert!(matches!(waited, Err(OrchestrationError::Timeout(_))));

    orchestrator.control(id, ControlAction::Resume, None).unwrap();
    let snapshot = orchestrator.wait_for_completion(id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, ExecutionState::Completed);
}
