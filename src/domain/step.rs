//! Steps and their attempt history.
//!
//! A Step is one planned command within a task. Every execution try is kept
//! as an [`Attempt`], so the record survives retries, policy blocks and
//! cancellation unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::output::FormattedOutput;

/// One planned command and its full retry history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Position of the step within the plan (0-based)
    pub index: usize,

    /// Current command text (replaced when the planner supplies a correction)
    pub command: String,

    /// Planner's explanation for the command, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    /// Execution history, append-only
    pub attempts: Vec<Attempt>,

    /// Final status of the step
    pub status: StepStatus,

    /// Number of corrected re-attempts made so far
    pub retry_count: u32,

    /// Why the step failed (set only when `status` is `Failed`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl Step {
    /// Create a pending step
    pub fn new(index: usize, command: impl Into<String>, rationale: Option<String>) -> Self {
        Self {
            index,
            command: command.into(),
            rationale,
            attempts: Vec::new(),
            status: StepStatus::Pending,
            retry_count: 0,
            failure: None,
        }
    }

    /// Number the next attempt will carry (1-indexed)
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Append an attempt to the history
    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    /// The most recent attempt, if any
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Mark the step successful
    pub fn succeed(&mut self) {
        self.status = StepStatus::Success;
        self.failure = None;
    }

    /// Mark the step failed
    pub fn fail(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.failure = Some(StepFailure {
            kind,
            reason: reason.into(),
            rule: None,
        });
    }

    /// Mark the step refused by the safety policy
    pub fn block(&mut self, reason: impl Into<String>, rule: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.failure = Some(StepFailure {
            kind: FailureKind::PolicyBlocked,
            reason: reason.into(),
            rule: Some(rule.into()),
        });
    }

    /// Whether the step reached a final status
    pub fn is_finished(&self) -> bool {
        self.status != StepStatus::Pending
    }

    /// Failure kind, if the step failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet run (or skipped after an earlier failure)
    Pending,

    /// Final attempt succeeded
    Success,

    /// Blocked, failed after retries, or interrupted
    Failed,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,

    /// Human-readable explanation
    pub reason: String,

    /// Policy rule that refused the command (policy blocks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

/// Failure taxonomy recorded on steps.
///
/// These are expected outcomes, surfaced as data in the task result rather
/// than raised as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The safety classifier refused the command
    PolicyBlocked,

    /// The command kept failing after all retries
    ExecutionFailed,

    /// A timeout or the operator stopped the command
    Interrupted,
}

/// One execution try of a step. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Attempt number within the step (1-indexed)
    pub number: u32,

    /// Command text that was executed
    pub command: String,

    /// Raw stdout
    pub output: String,

    /// Raw stderr (or a synthesized message when stderr was empty)
    pub error: String,

    pub success: bool,

    /// Process exit code; `None` when the process was interrupted
    pub return_code: Option<i32>,

    pub elapsed_ms: u64,

    /// Set when a timeout or cancellation terminated the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<InterruptReason>,

    /// Structured rendering of the output
    pub formatted: FormattedOutput,

    pub started_at: DateTime<Utc>,
}

impl Attempt {
    /// Whether the attempt was cut short
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_some()
    }

    /// Text to hand the planner when asking for a correction
    pub fn error_text(&self) -> &str {
        if self.error.is_empty() {
            &self.output
        } else {
            &self.error
        }
    }
}

/// What cut an attempt short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    Timeout,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(number: u32, error: &str, output: &str) -> Attempt {
        Attempt {
            number,
            command: "kubectl get pods".to_string(),
            output: output.to_string(),
            error: error.to_string(),
            success: false,
            return_code: Some(1),
            elapsed_ms: 12,
            interrupted: None,
            formatted: FormattedOutput::error(error, Some(1)),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = Step::new(0, "kubectl get pods", None);
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.next_attempt_number(), 1);

        step.record_attempt(attempt(1, "boom", ""));
        assert_eq!(step.next_attempt_number(), 2);

        step.succeed();
        assert!(step.is_finished());
        assert!(step.failure.is_none());
    }

    #[test]
    fn test_block_records_rule() {
        let mut step = Step::new(0, "kubectl delete pod x", None);
        step.block("dangerous command 'delete'", "dangerous_commands:delete");

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.failure_kind(), Some(FailureKind::PolicyBlocked));
        assert_eq!(
            step.failure.unwrap().rule.as_deref(),
            Some("dangerous_commands:delete")
        );
    }

    #[test]
    fn test_error_text_falls_back_to_output() {
        assert_eq!(attempt(1, "", "partial").error_text(), "partial");
        assert_eq!(attempt(1, "denied", "partial").error_text(), "denied");
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::PolicyBlocked).unwrap();
        assert_eq!(json, "\"policy_blocked\"");
    }
}
