//! # Step Executor
//!
//! Runs one dispatched task against the step registry, bounded by the task timeout and
//! the execution's cancellation signal, and reduces the result to a [`StepOutcome`].
//!
//! The handler runs in its own tokio task so a panicking handler is reported as a step
//! failure instead of taking the scheduler down with it.

use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{OrchestrationError, StepError};
use crate::models::StepOutcome;
use crate::orchestration::execution::Dispatch;
use crate::orchestration::registry::StepRegistry;

#[derive(Debug, Clone)]
pub struct StepExecutor {
    registry: StepRegistry,
}

impl StepExecutor {
    pub fn new(registry: StepRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    #[instrument(skip_all, fields(
        execution_id = %dispatch.execution_id,
        step_id = %dispatch.step_id,
        handler_type = %dispatch.handler_type,
        attempt = dispatch.attempt()
    ))]
    pub async fn execute(&self, dispatch: &Dispatch) -> StepOutcome {
        let registry = self.registry.clone();
        let handler_type = dispatch.handler_type.clone();
        let parameters = dispatch.parameters.clone();
        let context = dispatch.context.clone();
        let cancellation = dispatch.context.cancellation.clone();

        let started = Instant::now();
        let invocation =
            tokio::spawn(async move { registry.invoke(&handler_type, parameters, context).await });
        let abort = invocation.abort_handle();

        let joined = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                abort.abort();
                debug!("Execution cancelled, abandoning step invocation");
                return StepOutcome::Failed(StepError::Handler {
                    message: "execution cancelled".to_string(),
                    retryable: false,
                });
            }
            joined = timeout(dispatch.timeout, invocation) => joined,
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match joined {
            Err(_) => {
                abort.abort();
                let timeout_ms = u64::try_from(dispatch.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms = timeout_ms, "Step handler timed out");
                StepOutcome::Failed(StepError::Timeout { timeout_ms })
            }
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "Step handler panicked");
                StepOutcome::Failed(StepError::Handler {
                    message: format!("handler panicked: {join_error}"),
                    retryable: true,
                })
            }
            Ok(Ok(Ok(output))) => {
                debug!(elapsed_ms = elapsed_ms, "Step handler succeeded");
                StepOutcome::Succeeded(output)
            }
            Ok(Ok(Err(error))) => {
                debug!(elapsed_ms = elapsed_ms, error = %error, "Step handler failed");
                StepOutcome::Failed(step_error(error))
            }
        }
    }
}

fn step_error(error: OrchestrationError) -> StepError {
    match error {
        OrchestrationError::UnknownStepType { handler_type } => {
            StepError::UnknownStepType { handler_type }
        }
        OrchestrationError::Handler(handler_error) => handler_error.into(),
        other => StepError::Handler {
            message: other.to_string(),
            retryable: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::models::Parameters;
    use crate::orchestration::step_handler::{CancellationSignal, StepContext};
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn dispatch(handler_type: &str, timeout: Duration, context: StepContext) -> Dispatch {
        Dispatch {
            execution_id: context.execution_id,
            task_id: context.task_id,
            step_id: context.step_id.clone(),
            handler_type: handler_type.to_string(),
            parameters: Parameters::new(),
            timeout,
            context,
        }
    }

    fn registry() -> StepRegistry {
        let registry = StepRegistry::new();
        registry.register_fn("instant", |_, _| async {
            let mut output = Parameters::new();
            output.insert("ok".into(), json!(true));
            Ok(output)
        });
        registry.register_fn("slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Parameters::new())
        });
        registry.register_fn("rejecting", |_, _| async {
            Err(HandlerError::permanent("missing comparables"))
        });
        registry.register_fn("panicking", |_, _| async {
            if Uuid::new_v4().is_nil() {
                return Ok(Parameters::new());
            }
            panic!("handler bug")
        });
        registry
    }

    #[tokio::test]
    async fn test_success() {
        let executor = StepExecutor::new(registry());
        let outcome = executor
            .execute(&dispatch("instant", Duration::from_secs(1), StepContext::detached("a")))
            .await;
        assert!(matches!(outcome, StepOutcome::Succeeded(output) if output["ok"] == true));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let executor = StepExecutor::new(registry());
        let outcome = executor
            .execute(&dispatch("slow", Duration::from_millis(20), StepContext::detached("a")))
            .await;
        assert_eq!(outcome, StepOutcome::Failed(StepError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_unknown_step_type() {
        let executor = StepExecutor::new(registry());
        let outcome = executor
            .execute(&dispatch("ghost", Duration::from_secs(1), StepContext::detached("a")))
            .await;
        assert_eq!(
            outcome,
            StepOutcome::Failed(StepError::UnknownStepType {
                handler_type: "ghost".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_handler_error_keeps_retryability() {
        let executor = StepExecutor::new(registry());
        let outcome = executor
            .execute(&dispatch("rejecting", Duration::from_secs(1), StepContext::detached("a")))
            .await;
        match outcome {
            StepOutcome::Failed(error) => assert!(!error.is_retryable()),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let executor = StepExecutor::new(registry());
        let outcome = executor
            .execute(&dispatch("panicking", Duration::from_secs(1), StepContext::detached("a")))
            .await;
        assert!(matches!(outcome, StepOutcome::Failed(StepError::Handler { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_invocation() {
        let executor = StepExecutor::new(registry());
        let (trigger, signal) = CancellationSignal::channel();
        let mut context = StepContext::detached("a");
        context.cancellation = signal;

        let pending = dispatch("slow", Duration::from_secs(30), context);
        let run = tokio::spawn(async move { executor.execute(&pending).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Failed(StepError::Handler {
                retryable: false,
                ..
            })
        ));
    }
}
