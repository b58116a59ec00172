//! # Step Handlers
//!
//! Business logic behind a step type. A handler receives the task's merged parameters and a
//! [`StepContext`], and returns an output map or a [`HandlerError`].
//!
//! ## Usage
//!
//! ```rust
//! use propflow_core::models::Parameters;
//! use propflow_core::orchestration::step_handler::{StepContext, StepHandler};
//! use propflow_core::error::HandlerError;
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct PricingHandler;
//!
//! #[async_trait]
//! impl StepHandler for PricingHandler {
//!     async fn handle(
//!         &self,
//!         parameters: Parameters,
//!         _context: StepContext,
//!     ) -> Result<Parameters, HandlerError> {
//!         let sqft = parameters.get("sqft").and_then(|v| v.as_f64()).unwrap_or(0.0);
//!         let mut output = Parameters::new();
//!         output.insert("list_price".into(), json!(sqft * 310.0));
//!         Ok(output)
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut params = Parameters::new();
//! params.insert("sqft".into(), json!(1800));
//! let output = PricingHandler.handle(params, StepContext::detached("price")).await.unwrap();
//! assert_eq!(output["list_price"], json!(558000.0));
//! # });
//! ```

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::models::Parameters;

/// Cooperative cancellation signal handed to running handlers
///
/// Fires when the owning execution is cancelled. Handlers should check it at natural
/// yield points; the scheduler also stops awaiting the invocation once it fires.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

/// Sending half of a [`CancellationSignal`], owned by the execution
#[derive(Debug)]
pub struct CancellationTrigger {
    sender: watch::Sender<bool>,
}

impl CancellationSignal {
    pub fn channel() -> (CancellationTrigger, Self) {
        let (sender, receiver) = watch::channel(false);
        (CancellationTrigger { sender }, Self { receiver })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Trigger dropped without firing
            std::future::pending::<()>().await;
        }
    }
}

impl CancellationTrigger {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Invocation metadata passed alongside the parameters
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub step_id: String,
    /// 1-based invocation number, including retries
    pub attempt: u32,
    pub cancellation: CancellationSignal,
}

impl StepContext {
    /// Context for invoking a handler outside an execution
    pub fn detached(step_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::nil(),
            task_id: Uuid::new_v4(),
            step_id: step_id.into(),
            attempt: 1,
            cancellation: CancellationSignal::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(
        &self,
        parameters: Parameters,
        context: StepContext,
    ) -> Result<Parameters, HandlerError>;
}

type HandlerFn =
    dyn Fn(Parameters, StepContext) -> BoxFuture<'static, Result<Parameters, HandlerError>>
        + Send
        + Sync;

/// Adapts an async closure into a [`StepHandler`]
pub struct FnStepHandler {
    handler: Box<HandlerFn>,
}

impl FnStepHandler {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Parameters, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Parameters, HandlerError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |parameters: Parameters, context: StepContext| {
                handler(parameters, context).boxed()
            }),
        }
    }
}

impl fmt::Debug for FnStepHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStepHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepHandler for FnStepHandler {
    async fn handle(
        &self,
        parameters: Parameters,
        context: StepContext,
    ) -> Result<Parameters, HandlerError> {
        (self.handler)(parameters, context).await
    }
}
