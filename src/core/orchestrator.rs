//! Orchestrator façade.
//!
//! The single entry point for callers (CLI, web layer): submit queries,
//! cancel and inspect tasks, and read or update the safety policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, instrument};
use uuid::Uuid;

use super::engine::ExecutionEngine;
use super::error::OrchestratorError;
use super::registry::TaskRegistry;
use super::safety::{Policy, PolicyOverrides, PolicyStore, Verdict};
use crate::adapters::{Planner, ShellExecutor, SubprocessExecutor};
use crate::config::{EngineSettings, ExecutorSettings, ResolvedConfig};
use crate::domain::{Task, TaskResult, TaskSnapshot};

/// Per-submission overrides of the engine settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_first_failure: Option<bool>,
}

/// Answer to a cancellation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub task_id: String,

    /// True when the task was in flight and has been signalled
    pub found: bool,
}

/// Main orchestrator
pub struct Orchestrator {
    engine: Arc<ExecutionEngine>,
    registry: TaskRegistry,
    policy: Arc<PolicyStore>,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn ShellExecutor>,
        policy: Policy,
        settings: EngineSettings,
        executor_settings: ExecutorSettings,
    ) -> Self {
        let policy = Arc::new(PolicyStore::new(policy));
        let engine = ExecutionEngine::new(
            planner,
            executor,
            Arc::clone(&policy),
            executor_settings.timeout(),
        );

        Self {
            engine: Arc::new(engine),
            registry: TaskRegistry::new(),
            policy,
            settings,
        }
    }

    /// Orchestrator running real subprocesses with the resolved settings
    pub fn from_config(config: &ResolvedConfig, planner: Arc<dyn Planner>) -> Self {
        Self::new(
            planner,
            Arc::new(SubprocessExecutor::from_settings(&config.executor)),
            Policy::from_overrides(&config.policy),
            config.engine.clone(),
            config.executor.clone(),
        )
    }

    /// Fresh random task id
    pub fn new_task_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Run `query` to completion under `task_id` with default options
    pub async fn submit(&self, query: &str, task_id: &str) -> Result<TaskResult, OrchestratorError> {
        self.submit_with(query, task_id, SubmitOptions::default()).await
    }

    /// Run `query` to completion under `task_id`.
    ///
    /// The task runs on its own tokio task; dropping the returned future
    /// does not stop it (use [`Orchestrator::cancel`]).
    #[instrument(skip(self, query, options), fields(task_id = %task_id))]
    pub async fn submit_with(
        &self,
        query: &str,
        task_id: &str,
        options: SubmitOptions,
    ) -> Result<TaskResult, OrchestratorError> {
        let stop_on_first_failure = options
            .stop_on_first_failure
            .unwrap_or(self.settings.stop_on_first_failure);
        let mut retry = self.settings.retry_policy();
        if let Some(max_retries) = options.max_retries {
            retry.max_retries = max_retries;
        }

        let task = Task::new(task_id, query, stop_on_first_failure);
        let handle = self.registry.create(task.clone())?;
        info!(query = %query, "Task submitted");

        let engine = Arc::clone(&self.engine);
        let worker = tokio::spawn(async move {
            let mut task = task;
            let outcome = engine.run_task(&mut task, &handle, retry).await;
            handle.finish(&task);
            (task, outcome)
        });

        match worker.await {
            Ok((task, Ok(()))) => Ok(TaskResult::from(task)),
            Ok((_, Err(e))) => Err(e),
            Err(e) => Err(OrchestratorError::Worker(e.to_string())),
        }
    }

    /// Signal an in-flight task to stop
    pub fn cancel(&self, task_id: &str) -> CancelResponse {
        CancelResponse {
            task_id: task_id.to_string(),
            found: self.registry.cancel(task_id),
        }
    }

    /// Latest published state of a task
    pub fn status(&self, task_id: &str) -> Result<TaskSnapshot, OrchestratorError> {
        self.registry.status(task_id)
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.registry.list()
    }

    /// Current policy snapshot
    pub fn get_policy(&self) -> Arc<Policy> {
        self.policy.snapshot()
    }

    /// Merge custom additions into the policy; defaults are never removed
    pub fn set_policy(&self, update: &PolicyOverrides) -> Arc<Policy> {
        let policy = self.policy.update(update);
        info!(
            super_admin_mode = policy.super_admin_mode,
            shell_commands_enabled = policy.shell_commands_enabled,
            "Policy updated"
        );
        policy
    }

    /// Classify a command without running it
    pub fn validate(&self, command: &str) -> Verdict {
        self.policy.snapshot().classify(command)
    }

    /// Drop finished tasks older than the configured retention
    pub fn sweep(&self) -> usize {
        self.registry.sweep(self.settings.retention())
    }

    /// Sweep finished tasks every `interval` (at least one second) in the background
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let retention = self.settings.retention();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                registry.sweep(retention);
            }
        })
    }
}
