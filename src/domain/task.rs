//! Task state.
//!
//! A Task is the full unit of orchestration work for one submitted query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{Step, StepStatus};

/// One submitted query and the steps planned for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-supplied identifier
    pub id: String,

    /// The operator's original query
    pub query: String,

    /// Planned steps, in execution order
    pub steps: Vec<Step>,

    /// Current state of the task
    pub status: TaskStatus,

    /// Single- or multi-step plan (known once planning finished)
    pub execution_type: ExecutionType,

    /// Whether a failed step halts the rest of the plan
    pub stop_on_first_failure: bool,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Request-level error (planning failures)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a running task with no steps yet
    pub fn new(id: impl Into<String>, query: impl Into<String>, stop_on_first_failure: bool) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            steps: Vec::new(),
            status: TaskStatus::Running,
            execution_type: ExecutionType::SingleStep,
            stop_on_first_failure,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Move the task to a terminal state
    pub fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Check if the task is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskStatus::Running)
    }

    /// True when there is at least one step and every step succeeded
    pub fn all_steps_succeeded(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status == StepStatus::Success)
    }

    /// Total attempts recorded across all steps
    pub fn attempt_count(&self) -> usize {
        self.steps.iter().map(|s| s.attempts.len()).sum()
    }
}

/// State of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further work will happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Running
    }
}

/// Shape of the plan a task executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    SingleStep,
    MultiStep,
}

impl ExecutionType {
    /// Execution type for a plan with `steps` candidates
    pub fn for_plan_len(steps: usize) -> Self {
        if steps > 1 {
            Self::MultiStep
        } else {
            Self::SingleStep
        }
    }
}

/// Point-in-time view of a registered task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: Task,

    /// Whether a worker is still executing the task
    pub in_flight: bool,
}

/// Final result handed back to the caller of `submit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub query: String,

    /// True when the task completed with every step successful
    pub success: bool,

    pub execution_type: ExecutionType,
    pub status: TaskStatus,

    /// Every step with its full attempt history
    pub steps: Vec<Step>,

    /// True when the operator stopped the task
    pub cancelled: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskResult {
    fn from(task: Task) -> Self {
        Self {
            success: task.status == TaskStatus::Completed && task.all_steps_succeeded(),
            cancelled: task.status == TaskStatus::Cancelled,
            task_id: task.id,
            query: task.query,
            execution_type: task.execution_type,
            status: task.status,
            steps: task.steps,
            created_at: task.created_at,
            finished_at: task.finished_at,
        }
    }
}
