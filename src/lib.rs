#![allow(clippy::doc_markdown)] // Allow technical terms in docs without backticks
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Propflow Core
//!
//! In-memory workflow orchestration for real-estate marketing packages.
//!
//! ## Overview
//!
//! A *package* (for example `new_listing`: analyze the property, then price, market, and
//! schedule photography in parallel, then publish and announce) is a template of steps
//! linked by dependencies. The orchestrator validates the template into a DAG, runs each
//! ready step on a registered async handler under a global concurrency limit, and tracks
//! every execution through pause, resume, and cancel until it settles.
//!
//! ## Module Organization
//!
//! - [`models`] - Templates, tasks, and executions
//! - [`state_machine`] - Task and execution state rules
//! - [`orchestration`] - Registries, dependency graph, scheduler, and status snapshots
//! - [`events`] - Broadcast lifecycle events
//! - [`packages`] - Built-in package templates
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust
//! use propflow_core::{Orchestrator, OrchestratorConfig, Parameters, StepRegistry};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let registry = StepRegistry::new();
//! for handler_type in propflow_core::packages::builtin_handler_types().unwrap() {
//!     registry.register_fn(&handler_type, |_params, ctx| async move {
//!         let mut output = Parameters::new();
//!         output.insert("step".into(), json!(ctx.step_id));
//!         Ok(output)
//!     });
//! }
//!
//! let orchestrator = Orchestrator::new(OrchestratorConfig::for_testing(), registry).unwrap();
//! orchestrator.register_builtin_packages().unwrap();
//!
//! let mut params = Parameters::new();
//! params.insert("property_id".into(), json!("prop-1001"));
//! let id = orchestrator.execute("new_listing", params).unwrap();
//!
//! let snapshot = orchestrator.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
//! assert_eq!(snapshot.progress_percent, 100.0);
//! # });
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod packages;
pub mod state_machine;

pub use config::OrchestratorConfig;
pub use constants::{status_groups, system, ExecutionStatus, TaskStatus};
pub use error::{HandlerError, OrchestrationError, OrchestrationResult, StepError};
pub use events::{EventPublisher, OrchestrationEvent};
pub use models::{Execution, PackageTemplate, Parameters, StepDefinition, StepOutcome, Task};
pub use orchestration::{
    DependencyGraph, ExecutionSnapshot, ExecutionSummary, Orchestrator, StepContext,
    StepHandler, StepRegistry, TaskSnapshot,
};
pub use state_machine::{ControlAction, ExecutionState, TaskState};
