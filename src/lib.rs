//! k8helper - natural-language Kubernetes assistant
//!
//! Turns an operator's request into kubectl commands through a planner,
//! checks every command against a safety policy, runs the allowed ones as
//! supervised subprocesses and retries failures with planner corrections.
//!
//! # Architecture
//!
//! - Every command passes the safety classifier before it can run
//! - Tasks run concurrently, each on its own tokio task, and can be
//!   cancelled mid-command (the whole process group is terminated)
//! - Every attempt is recorded, so a task result is a full audit trail
//!
//! # Modules
//!
//! - `adapters`: Planner and shell executor seams (HTTP planner, subprocesses)
//! - `core`: Safety, formatting, retry, engine, registry and the orchestrator
//! - `domain`: Data structures (Task, Step, Attempt, FormattedOutput)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ask in natural language
//! k8helper ask "which pods in prod are not ready?"
//!
//! # Run explicit commands under supervision
//! k8helper exec "kubectl get pods -n prod" "kubectl get events -n prod"
//!
//! # Check a command against the policy
//! k8helper validate kubectl delete pod web-1
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{CommandCandidate, ExecOutput, Plan, PlanRequest, Planner, ShellExecutor};
pub use crate::core::{
    CancelResponse, Decision, Orchestrator, OrchestratorError, Policy, PolicyOverrides,
    SubmitOptions, Verdict,
};
pub use domain::{Attempt, FailureKind, FormattedOutput, Step, StepStatus, Task, TaskResult, TaskStatus};
