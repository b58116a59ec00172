//! # Step Registry
//!
//! Maps `handler_type` keys to step handlers.
//!
//! ## Key Features
//!
//! - **Thread-safe operations** using RwLock for concurrent access
//! - **Replace on re-register** with a warning, so startup wiring stays order-independent
//! - **Closure handlers** through [`FnStepHandler`]

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::events;
use crate::error::{HandlerError, OrchestrationError, OrchestrationResult};
use crate::logging::log_registry_operation;
use crate::models::Parameters;
use crate::orchestration::step_handler::{FnStepHandler, StepContext, StepHandler};

#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn StepHandler>>>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `handler_type`, replacing any existing one
    pub fn register(&self, handler_type: &str, handler: Arc<dyn StepHandler>) {
        let replaced = self
            .handlers
            .write()
            .insert(handler_type.to_string(), handler)
            .is_some();

        if replaced {
            warn!(handler_type = handler_type, "Step handler already registered, replacing");
        }
        log_registry_operation(
            events::STEP_HANDLER_REGISTERED,
            handler_type,
            if replaced { "replaced" } else { "registered" },
            None,
        );
    }

    /// Register an async closure as the handler for `handler_type`
    pub fn register_fn<F, Fut>(&self, handler_type: &str, handler: F)
    where
        F: Fn(Parameters, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Parameters, HandlerError>> + Send + 'static,
    {
        self.register(handler_type, Arc::new(FnStepHandler::new(handler)));
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.read().get(handler_type).cloned()
    }

    /// Invoke the handler registered for `handler_type`
    ///
    /// The read lock is released before the handler runs.
    pub async fn invoke(
        &self,
        handler_type: &str,
        parameters: Parameters,
        context: StepContext,
    ) -> OrchestrationResult<Parameters> {
        let handler = self
            .get(handler_type)
            .ok_or_else(|| OrchestrationError::UnknownStepType {
                handler_type: handler_type.to_string(),
            })?;

        debug!(
            handler_type = handler_type,
            step_id = %context.step_id,
            attempt = context.attempt,
            "Invoking step handler"
        );

        Ok(handler.handle(parameters, context).await?)
    }

    pub fn contains(&self, handler_type: &str) -> bool {
        self.handlers.read().contains_key(handler_type)
    }

    /// Registered handler types, sorted
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("handler_types", &self.handler_types())
            .finish()
    }
}
