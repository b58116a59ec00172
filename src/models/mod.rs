//! # Models
//!
//! Plain data types for templates, tasks, and executions. Scheduling logic lives in
//! [`crate::orchestration`]; these types only enforce their own transition rules.

pub mod execution;
pub mod task;
pub mod template;

/// Key/value parameters passed to step handlers and returned as step outputs
pub type Parameters = serde_json::Map<String, serde_json::Value>;

pub use execution::Execution;
pub use task::{StepOutcome, Task};
pub use template::{PackageTemplate, StepDefinition};
