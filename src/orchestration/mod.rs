//! # Orchestration Engine
//!
//! Scheduling core for package executions.
//!
//! ## Core Components
//!
//! - **StepRegistry**: Maps handler types to async step handlers
//! - **DependencyGraph**: Validates templates and exposes the step DAG
//! - **TemplateRegistry**: Registered templates with their prebuilt graphs
//! - **ReadyQueue**: Priority heap of tasks whose dependencies are satisfied
//! - **ExecutionHandle**: Per-execution task table and lifecycle transitions
//! - **StepExecutor**: Runs one task with timeout and cancellation
//! - **Orchestrator**: Dispatcher, concurrency limit, control surface, and retention
//! - **Status**: Serializable execution and task snapshots

pub mod dependency_graph;
pub mod execution;
pub mod orchestrator;
pub mod ready_queue;
pub mod registry;
pub mod status;
pub mod step_executor;
pub mod step_handler;
pub mod template_registry;

// Re-export core types and components for easy access
pub use dependency_graph::DependencyGraph;
pub use execution::{Dispatch, ExecutionHandle};
pub use orchestrator::Orchestrator;
pub use ready_queue::{ReadyEntry, ReadyQueue};
pub use registry::StepRegistry;
pub use status::{ExecutionSnapshot, ExecutionSummary, TaskFailure, TaskSnapshot};
pub use step_executor::StepExecutor;
pub use step_handler::{
    CancellationSignal, CancellationTrigger, FnStepHandler, StepContext, StepHandler,
};
pub use template_registry::{RegisteredTemplate, TemplateRegistry};
