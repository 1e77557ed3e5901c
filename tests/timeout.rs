//! Timeout Integration Tests
//!
//! Runs real shell processes to check timeout and cancellation handling,
//! including process-group termination and partial output capture.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use k8helper::adapters::{ShellExecutor, StaticPlanner, SubprocessExecutor};
use k8helper::config::{EngineSettings, ExecutorSettings};
use k8helper::core::{Orchestrator, Policy, PolicyOverrides};
use k8helper::domain::{FailureKind, FormattedOutput, InterruptReason, TaskStatus};

fn sh() -> SubprocessExecutor {
    SubprocessExecutor::new()
        .with_shell("/bin/sh")
        .with_pipefail(false)
        .with_grace_period(Duration::from_millis(200))
}

#[tokio::test]
async fn test_fast_command_completes() {
    let output = sh()
        .run("echo hello; echo oops >&2; exit 3", Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.stdout, "hello");
    assert_eq!(output.stderr, "oops");
    assert_eq!(output.return_code, Some(3));
    assert_eq!(output.interrupted, None);
    assert!(!output.success());
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let started = Instant::now();
    let output = sh()
        .run("echo started; sleep 10", Duration::from_millis(300), &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(output.interrupted, Some(InterruptReason::Timeout));
    assert_eq!(output.return_code, None);
    assert_eq!(output.stdout, "started");
    assert!(output.stderr.contains("timed out"));
}

#[tokio::test]
async fn test_timeout_kills_whole_pipeline() {
    let started = Instant::now();
    let output = sh()
        .run("sleep 10 | cat", Duration::from_millis(300), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.interrupted, Some(InterruptReason::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_sigterm_ignored_escalates_to_kill() {
    let started = Instant::now();
    let output = sh()
        .run("trap '' TERM; sleep 10", Duration::from_millis(200), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.interrupted, Some(InterruptReason::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancel_interrupts_command() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let output = sh()
        .run("echo waiting; sleep 10", Duration::from_secs(30), &cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(output.interrupted, Some(InterruptReason::Cancelled));
    assert_eq!(output.stdout, "waiting");
    assert_eq!(output.stderr, "command cancelled");
}

#[tokio::test]
async fn test_missing_shell_is_an_error() {
    let result = SubprocessExecutor::new()
        .with_shell("/nonexistent/shell")
        .run("echo hi", Duration::from_secs(1), &CancellationToken::new())
        .await;
    assert!(result.is_err());
}

fn orchestrator(commands: &[&str]) -> Orchestrator {
    Orchestrator::new(
        Arc::new(StaticPlanner::from_commands(commands)),
        Arc::new(sh()),
        Policy::default(),
        EngineSettings {
            max_retries: 0,
            ..EngineSettings::default()
        },
        ExecutorSettings {
            timeout_seconds: 1,
            ..ExecutorSettings::default()
        },
    )
}

#[tokio::test]
async fn test_task_runs_real_commands() {
    let orchestrator = orchestrator(&["echo 'NAME   READY   STATUS'; echo 'web-0  1/1     Running'"]);

    let result = orchestrator.submit("fake pods", "t-real").await.unwrap();

    assert!(result.success);
    match &result.steps[0].attempts[0].formatted {
        FormattedOutput::Table { headers, rows, .. } => {
            assert_eq!(headers, &vec!["NAME".to_string(), "READY".to_string(), "STATUS".to_string()]);
            assert_eq!(rows[0][0], "web-0");
        }
        other => panic!("expected a table, got {:?}", other),
    }
}

#[tokio::test]
async fn test_task_step_times_out() {
    let orchestrator = orchestrator(&["echo begin; sleep 10"]);
    orchestrator.set_policy(&PolicyOverrides {
        safe_shell_utilities: Some(vec!["sleep".to_string()]),
        ..Default::default()
    });

    let started = Instant::now();
    let result = orchestrator.submit("slow", "t-slow").await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(result.status, TaskStatus::Failed);
    let step = &result.steps[0];
    assert_eq!(step.failure_kind(), Some(FailureKind::Interrupted));
    assert_eq!(step.attempts[0].interrupted, Some(InterruptReason::Timeout));
    assert_eq!(step.attempts[0].output, "begin");
}
