//! Core orchestration logic.
//!
//! This module contains:
//! - Safety: policy snapshots and command classification
//! - Format: structured rendering of command output
//! - Retry: per-step execution with planner-driven correction
//! - Engine: planning and sequential step execution
//! - Registry: concurrent task table with cancellation
//! - Orchestrator: the façade callers use

pub mod engine;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod safety;

// Re-export commonly used types
pub use engine::ExecutionEngine;
pub use error::OrchestratorError;
pub use format::format_output;
pub use orchestrator::{CancelResponse, Orchestrator, SubmitOptions};
pub use registry::{TaskHandle, TaskRegistry};
pub use retry::{RetryController, RetryPolicy};
pub use safety::{classify, Decision, Policy, PolicyOverrides, PolicyStore, Verdict};
