//! Task execution: plan, then run each step in order.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use super::error::OrchestratorError;
use super::registry::TaskHandle;
use super::retry::{RetryController, RetryPolicy};
use super::safety::PolicyStore;
use crate::adapters::{PlanRequest, Planner, ShellExecutor};
use crate::domain::{ExecutionType, Step, StepStatus, Task, TaskStatus};

/// Runs one task from query to final status
pub struct ExecutionEngine {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ShellExecutor>,
    policy: Arc<PolicyStore>,
    timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn ShellExecutor>,
        policy: Arc<PolicyStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            planner,
            executor,
            policy,
            timeout,
        }
    }

    /// Plan and execute `task`, publishing progress through `handle`.
    ///
    /// On return the task is in a terminal state. Only planning failures are
    /// returned as errors; step failures are recorded on the task.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub async fn run_task(
        &self,
        task: &mut Task,
        handle: &TaskHandle,
        retry: RetryPolicy,
    ) -> Result<(), OrchestratorError> {
        let cancel = handle.cancellation_token().clone();

        info!(
            task_id = handle.id(),
            planner = self.planner.name(),
            query = %task.query,
            "Planning task"
        );
        let request = PlanRequest::initial(task.query.clone());
        let planned = tokio::select! {
            plan = self.planner.plan(&request) => Some(plan),
            _ = cancel.cancelled() => None,
        };

        let plan = match planned {
            None => {
                info!("Task cancelled during planning");
                task.finish(TaskStatus::Cancelled);
                return Ok(());
            }
            Some(Err(e)) => {
                let message = format!("{:#}", e);
                error!(error = %message, "Planner failed");
                task.error = Some(message.clone());
                task.finish(TaskStatus::Failed);
                return Err(OrchestratorError::PlanningFailed(message));
            }
            Some(Ok(plan)) if plan.is_empty() => {
                let message = "planner returned no commands".to_string();
                error!("Planner returned no commands");
                task.error = Some(message.clone());
                task.finish(TaskStatus::Failed);
                return Err(OrchestratorError::PlanningFailed(message));
            }
            Some(Ok(plan)) => plan,
        };

        task.execution_type = ExecutionType::for_plan_len(plan.len());
        task.steps = plan
            .candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                Step::new(
                    index,
                    candidate.command_line(),
                    candidate.rationale().map(str::to_string),
                )
            })
            .collect();
        info!(steps = task.steps.len(), execution_type = ?task.execution_type, "Task planned");
        handle.publish(task);

        let controller = RetryController::new(
            Arc::clone(&self.planner),
            Arc::clone(&self.executor),
            retry,
            self.timeout,
        );

        for index in 0..task.steps.len() {
            if cancel.is_cancelled() {
                break;
            }

            let policy = self.policy.snapshot();
            info!(step = index, command = %task.steps[index].command, "Executing step");
            controller
                .execute_step(&mut task.steps[index], &task.query, &policy, &cancel)
                .await;
            handle.publish(task);

            let step = &task.steps[index];
            if step.status == StepStatus::Failed && task.stop_on_first_failure {
                info!(
                    step = index,
                    failure = ?step.failure_kind(),
                    skipped = task.steps.len() - index - 1,
                    "Stopping after failed step"
                );
                break;
            }
        }

        let status = if cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else if task.all_steps_succeeded() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.finish(status);
        info!(status = ?status, attempts = task.attempt_count(), "Task finished");

        Ok(())
    }
}
