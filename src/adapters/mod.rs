//! Adapter interfaces for external systems.
//!
//! The orchestrator talks to the outside world through two seams:
//! - [`Planner`]: turns a query (or a failure) into candidate commands
//! - [`ShellExecutor`]: runs one command line with a timeout
//!
//! Both are traits so tests can script them.

pub mod planner;
pub mod shell;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::safety::is_bare_kubectl_subcommand;
use crate::domain::InterruptReason;

pub use planner::{parse_plan, HttpPlanner, StaticPlanner};
pub use shell::SubprocessExecutor;

/// One command proposed by the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandCandidate {
    /// A kubectl invocation; `args` is everything after `kubectl`
    Kubectl {
        args: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },

    /// Any other shell line, run verbatim
    Shell {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

impl CommandCandidate {
    /// Build a candidate from a command line.
    ///
    /// Lines starting with `kubectl` or a bare kubectl subcommand become
    /// [`CommandCandidate::Kubectl`].
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("kubectl ") {
            return Self::Kubectl {
                args: rest.trim().to_string(),
                rationale: None,
            };
        }
        if line == "kubectl" {
            return Self::Kubectl {
                args: String::new(),
                rationale: None,
            };
        }
        if is_bare_kubectl_subcommand(line) {
            return Self::Kubectl {
                args: line.to_string(),
                rationale: None,
            };
        }
        Self::Shell {
            script: line.to_string(),
            rationale: None,
        }
    }

    /// Attach a rationale
    pub fn with_rationale(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let text = if text.trim().is_empty() { None } else { Some(text) };
        match &mut self {
            Self::Kubectl { rationale, .. } | Self::Shell { rationale, .. } => *rationale = text,
        }
        self
    }

    /// The full command line to execute
    pub fn command_line(&self) -> String {
        match self {
            Self::Kubectl { args, .. } if args.is_empty() => "kubectl".to_string(),
            Self::Kubectl { args, .. } => format!("kubectl {}", args),
            Self::Shell { script, .. } => script.clone(),
        }
    }

    pub fn rationale(&self) -> Option<&str> {
        match self {
            Self::Kubectl { rationale, .. } | Self::Shell { rationale, .. } => rationale.as_deref(),
        }
    }
}

/// What went wrong with the previous attempt, for correction requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorFailure {
    pub command: String,
    pub error: String,
}

/// Input to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// The operator's query
    pub query: String,

    /// Set when asking for a corrected command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_failure: Option<PriorFailure>,
}

impl PlanRequest {
    /// Request for the initial plan
    pub fn initial(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            prior_failure: None,
        }
    }

    /// Request for a correction of a failed command
    pub fn correction(
        query: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            prior_failure: Some(PriorFailure {
                command: command.into(),
                error: error.into(),
            }),
        }
    }

    pub fn is_correction(&self) -> bool {
        self.prior_failure.is_some()
    }
}

/// Ordered candidate commands returned by a planner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub candidates: Vec<CommandCandidate>,
}

impl Plan {
    pub fn new(candidates: Vec<CommandCandidate>) -> Self {
        Self { candidates }
    }

    /// Plan from raw command lines
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            candidates: lines
                .into_iter()
                .map(|l| l.as_ref().trim().to_string())
                .filter(|l| !l.is_empty())
                .map(|l| CommandCandidate::parse(&l))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

/// Trait for command planners (LLM services, fixed plans)
#[async_trait]
pub trait Planner: Send + Sync {
    /// Human-readable planner name
    fn name(&self) -> &str;

    /// Produce candidate commands for a query or a correction request
    async fn plan(&self, request: &PlanRequest) -> Result<Plan>;
}

/// Result of running one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured stdout, trimmed
    pub stdout: String,

    /// Captured stderr, trimmed
    pub stderr: String,

    /// Exit code; `None` when the process was interrupted or killed by a signal
    pub return_code: Option<i32>,

    pub elapsed: Duration,

    /// Set when a timeout or cancellation terminated the process
    pub interrupted: Option<InterruptReason>,
}

impl ExecOutput {
    /// Whether the command ran to completion with exit code 0
    pub fn success(&self) -> bool {
        self.interrupted.is_none() && self.return_code == Some(0)
    }
}

/// Trait for command executors
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// Run `command`, terminating it when `timeout` elapses or `cancel` fires.
    ///
    /// Errors are reserved for failures to start the command; a non-zero exit
    /// or an interruption is reported through [`ExecOutput`].
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_parse() {
        let c = CommandCandidate::parse("kubectl get pods -n prod");
        assert_eq!(
            c,
            CommandCandidate::Kubectl {
                args: "get pods -n prod".to_string(),
                rationale: None
            }
        );
        assert_eq!(c.command_line(), "kubectl get pods -n prod");

        let bare = CommandCandidate::parse("get nodes");
        assert_eq!(bare.command_line(), "kubectl get nodes");

        let shell = CommandCandidate::parse("echo done");
        assert!(matches!(shell, CommandCandidate::Shell { .. }));
        assert_eq!(shell.command_line(), "echo done");
    }

    #[test]
    fn test_candidate_serialization() {
        let c = CommandCandidate::parse("kubectl get pods").with_rationale("list pods");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["kind"], "kubectl");
        assert_eq!(json["rationale"], "list pods");
    }

    #[test]
    fn test_plan_from_lines_skips_blank() {
        let plan = Plan::from_lines(["kubectl get ns", "  ", "kubectl get pods"]);
        assert_eq!(plan.len(), 2);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_exec_output_success() {
        let out = ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            return_code: Some(0),
            elapsed: Duration::from_millis(5),
            interrupted: None,
        };
        assert!(out.success());

        let timed_out = ExecOutput {
            interrupted: Some(InterruptReason::Timeout),
            return_code: None,
            ..out
        };
        assert!(!timed_out.success());
    }
}
