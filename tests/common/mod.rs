//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use k8helper::adapters::{ExecOutput, Plan, PlanRequest, Planner, ShellExecutor};
use k8helper::config::{EngineSettings, ExecutorSettings};
use k8helper::core::{Orchestrator, Policy, RetryPolicy};
use k8helper::domain::InterruptReason;

/// Canned behaviour for one executor call
#[derive(Debug, Clone)]
pub enum Scripted {
    Success(String),
    Failure(i32, String),
    /// Block until the timeout elapses or the token fires
    Hang,
}

/// Shell executor that replays scripted outcomes per command line
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for `command`; the last one repeats once the queue drains
    pub fn on(self, command: &str, outcomes: Vec<Scripted>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), outcomes.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next_outcome(&self, command: &str) -> Scripted {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Scripted::Success(String::new())),
            None => Scripted::Failure(127, format!("unscripted command: {}", command)),
        }
    }
}

#[async_trait]
impl ShellExecutor for ScriptedExecutor {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        let outcome = self.next_outcome(command);

        let output = match outcome {
            Scripted::Success(stdout) => ExecOutput {
                stdout,
                stderr: String::new(),
                return_code: Some(0),
                elapsed: Duration::from_millis(1),
                interrupted: None,
            },
            Scripted::Failure(code, stderr) => ExecOutput {
                stdout: String::new(),
                stderr,
                return_code: Some(code),
                elapsed: Duration::from_millis(1),
                interrupted: None,
            },
            Scripted::Hang => {
                let reason = tokio::select! {
                    _ = tokio::time::sleep(timeout) => InterruptReason::Timeout,
                    _ = cancel.cancelled() => InterruptReason::Cancelled,
                };
                ExecOutput {
                    stdout: String::new(),
                    stderr: "interrupted".to_string(),
                    return_code: None,
                    elapsed: Duration::from_millis(1),
                    interrupted: Some(reason),
                }
            }
        };
        Ok(output)
    }
}

/// Planner with a fixed initial plan and a queue of corrections
pub struct ScriptedPlanner {
    initial: Mutex<Option<Result<Plan, String>>>,
    corrections: Mutex<VecDeque<Plan>>,
    requests: Mutex<Vec<PlanRequest>>,
    delay: Duration,
}

impl ScriptedPlanner {
    pub fn new(commands: &[&str]) -> Self {
        Self {
            initial: Mutex::new(Some(Ok(Plan::from_lines(commands)))),
            corrections: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Planner whose initial request fails
    pub fn failing(message: &str) -> Self {
        let planner = Self::new(&[]);
        *planner.initial.lock().unwrap() = Some(Err(message.to_string()));
        planner
    }

    /// Queue a correction (an empty slice means "no correction")
    pub fn correct_with(self, commands: &[&str]) -> Self {
        self.corrections
            .lock()
            .unwrap()
            .push_back(Plan::from_lines(commands));
        self
    }

    /// Wait before answering the initial request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        self.requests.lock().unwrap().push(request.clone());

        if request.is_correction() {
            return Ok(self.corrections.lock().unwrap().pop_front().unwrap_or_default());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let initial = self.initial.lock().unwrap().clone();
        match initial {
            Some(Ok(plan)) => Ok(plan),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(Plan::default()),
        }
    }
}

/// Fast retry settings for tests
pub fn engine_settings(max_retries: u32) -> EngineSettings {
    EngineSettings {
        max_retries,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        stop_on_first_failure: true,
        task_retention_seconds: 3600,
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    engine_settings(max_retries).retry_policy()
}

pub fn executor_settings(timeout_seconds: u64) -> ExecutorSettings {
    ExecutorSettings {
        timeout_seconds,
        ..ExecutorSettings::default()
    }
}

/// Orchestrator over scripted fakes with the default policy
pub fn orchestrator(
    planner: Arc<ScriptedPlanner>,
    executor: Arc<ScriptedExecutor>,
    max_retries: u32,
) -> Orchestrator {
    Orchestrator::new(
        planner,
        executor,
        Policy::default(),
        engine_settings(max_retries),
        executor_settings(5),
    )
}

/// Poll until `check` passes or two seconds elapse
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    wait_until_within(Duration::from_secs(2), check).await;
}

pub async fn wait_until_within<F: Fn() -> bool>(limit: Duration, check: F) {
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            limit
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
