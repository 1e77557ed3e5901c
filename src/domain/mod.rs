//! Domain types for the k8helper orchestrator.
//!
//! This module contains the core data structures:
//! - Task: one submitted query and its lifecycle
//! - Step / Attempt: planned commands and their execution history
//! - FormattedOutput: structured rendering of command output

pub mod output;
pub mod step;
pub mod task;

// Re-export commonly used types
pub use output::{ContentKind, DescribeSection, FormattedOutput};
pub use step::{Attempt, FailureKind, InterruptReason, Step, StepFailure, StepStatus};
pub use task::{ExecutionType, Task, TaskResult, TaskSnapshot, TaskStatus};
