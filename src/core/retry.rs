//! Per-step execution with safety checks and planner-driven correction.
//!
//! Each attempt is classified first; an allowed command runs through the
//! shell executor and a failure asks the planner for a corrected command,
//! up to `max_retries` times.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::format::format_output;
use super::safety::Policy;
use crate::adapters::{ExecOutput, PlanRequest, Planner, ShellExecutor};
use crate::domain::{Attempt, FailureKind, InterruptReason, Step};

/// Retry behaviour for failed steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Corrected re-attempts allowed after the first try
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first re-attempt in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between re-attempts in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    250
}
fn default_max_delay() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before re-attempt `retry` (1-indexed)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi((retry - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another re-attempt is allowed after `retries_so_far`
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

/// Drives one step through classification, execution and correction
pub struct RetryController {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ShellExecutor>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RetryController {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn ShellExecutor>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            planner,
            executor,
            retry,
            timeout,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `step` to a final status.
    ///
    /// Every outcome is recorded on the step; nothing is returned. A command
    /// refused by `policy` never reaches the executor and records no attempt.
    #[instrument(skip_all, fields(step = step.index))]
    pub async fn execute_step(
        &self,
        step: &mut Step,
        query: &str,
        policy: &Policy,
        cancel: &CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                step.fail(FailureKind::Interrupted, "cancelled before execution");
                return;
            }

            let verdict = policy.classify(&step.command);
            if !verdict.is_allowed() {
                warn!(
                    command = %step.command,
                    decision = %verdict.decision,
                    rule = %verdict.rule,
                    "Command refused by safety policy"
                );
                step.block(verdict.reason, verdict.rule);
                return;
            }

            let attempt = self.run_attempt(step, cancel).await;
            let success = attempt.success;
            let interrupted = attempt.interrupted;
            let error_text = attempt.error_text().to_string();
            step.record_attempt(attempt);

            if success {
                info!(attempt = step.attempts.len(), "Step succeeded");
                step.succeed();
                return;
            }

            if interrupted == Some(InterruptReason::Cancelled) {
                step.fail(FailureKind::Interrupted, "cancelled by operator");
                return;
            }

            let exhausted_kind = if interrupted.is_some() {
                FailureKind::Interrupted
            } else {
                FailureKind::ExecutionFailed
            };

            if !self.retry.should_retry(step.retry_count) {
                step.fail(
                    exhausted_kind,
                    format!("failed after {} attempt(s): {}", step.attempts.len(), error_text),
                );
                return;
            }

            let request = PlanRequest::correction(query, step.command.clone(), error_text.clone());
            let plan = tokio::select! {
                plan = self.planner.plan(&request) => plan,
                _ = cancel.cancelled() => {
                    step.fail(FailureKind::Interrupted, "cancelled while waiting for a correction");
                    return;
                }
            };

            let candidate = match plan {
                Ok(plan) => plan.candidates.into_iter().next(),
                Err(e) => {
                    warn!(error = %e, "Planner failed to correct command");
                    step.fail(
                        exhausted_kind,
                        format!("{} (no correction: {:#})", error_text, e),
                    );
                    return;
                }
            };

            let Some(candidate) = candidate else {
                step.fail(
                    exhausted_kind,
                    format!("{} (planner offered no correction)", error_text),
                );
                return;
            };

            let corrected = candidate.command_line();
            if corrected.trim() == step.command.trim() {
                step.fail(
                    exhausted_kind,
                    format!("{} (planner repeated the failing command)", error_text),
                );
                return;
            }

            step.retry_count += 1;
            let delay = self.retry.delay_for_retry(step.retry_count);
            warn!(
                retry = step.retry_count,
                failed = %step.command,
                corrected = %corrected,
                delay_ms = delay.as_millis() as u64,
                "Retrying with corrected command"
            );

            step.command = corrected;
            if let Some(rationale) = candidate.rationale() {
                step.rationale = Some(rationale.to_string());
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    step.fail(FailureKind::Interrupted, "cancelled while waiting to retry");
                    return;
                }
            }
        }
    }

    async fn run_attempt(&self, step: &Step, cancel: &CancellationToken) -> Attempt {
        let number = step.next_attempt_number();
        let command = step.command.clone();
        let started_at = Utc::now();

        let output = match self.executor.run(&command, self.timeout, cancel).await {
            Ok(output) => output,
            Err(e) => ExecOutput {
                stdout: String::new(),
                stderr: format!("{:#}", e),
                return_code: None,
                elapsed: Duration::ZERO,
                interrupted: None,
            },
        };

        let success = output.success();
        let formatted = format_output(
            &command,
            &output.stdout,
            &output.stderr,
            success,
            output.return_code,
        );

        let elapsed_ms = output.elapsed.as_millis() as u64;
        match output.interrupted {
            Some(reason) => warn!(attempt = number, reason = ?reason, elapsed_ms, "Attempt interrupted"),
            None if !success => warn!(
                attempt = number,
                return_code = ?output.return_code,
                elapsed_ms,
                "Attempt failed"
            ),
            None => info!(attempt = number, elapsed_ms, "Attempt succeeded"),
        }

        Attempt {
            number,
            command,
            error: if success { String::new() } else { output.stderr },
            output: output.stdout,
            success,
            return_code: output.return_code,
            elapsed_ms,
            interrupted: output.interrupted,
            formatted,
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retries().should_retry(0));
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_retries: 1").unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.initial_delay_ms, 250);
    }
}
