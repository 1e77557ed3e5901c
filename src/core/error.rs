//! Request-level errors surfaced to callers of the orchestrator.
//!
//! Step-level outcomes (policy blocks, failed commands, interruptions) are
//! recorded on the task as [`FailureKind`](crate::domain::FailureKind), not
//! raised here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Task id already in flight: {0}")]
    DuplicateTaskId(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task worker failed: {0}")]
    Worker(String),
}
