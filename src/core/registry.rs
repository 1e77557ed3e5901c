//! Concurrent registry of tasks.
//!
//! The registry maps task ids to their latest published state and their
//! cancellation token. Workers own a [`TaskHandle`]; the handle publishes
//! state and, when finished or dropped, marks the task as no longer in
//! flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::OrchestratorError;
use crate::domain::{Task, TaskSnapshot, TaskStatus};

struct Entry {
    task: Task,
    cancel: CancellationToken,
    in_flight: bool,
    /// Distinguishes reuses of the same task id
    generation: Uuid,
}

impl Entry {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task: self.task.clone(),
            in_flight: self.in_flight,
        }
    }
}

/// Shared task table. Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new running task.
    ///
    /// Fails with `DuplicateTaskId` while a task with the same id is in
    /// flight; a finished task's id may be reused.
    pub fn create(&self, task: Task) -> Result<TaskHandle, OrchestratorError> {
        let id = task.id.clone();
        let mut tasks = self.lock();

        if tasks.get(&id).map(|e| e.in_flight).unwrap_or(false) {
            return Err(OrchestratorError::DuplicateTaskId(id));
        }

        let cancel = CancellationToken::new();
        let generation = Uuid::new_v4();
        tasks.insert(
            id.clone(),
            Entry {
                task,
                cancel: cancel.clone(),
                in_flight: true,
                generation,
            },
        );
        debug!(task_id = %id, "Registered task");

        Ok(TaskHandle {
            id,
            cancel,
            generation,
            registry: self.clone(),
            finished: false,
        })
    }

    /// Request cancellation of an in-flight task.
    ///
    /// Returns `true` while the task is in flight (repeat calls included);
    /// `false` for unknown or already finished tasks.
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.lock();
        match tasks.get_mut(id) {
            Some(entry) if entry.in_flight => {
                entry.cancel.cancel();
                entry.task.status = TaskStatus::Cancelled;
                info!(task_id = %id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Latest state of a task
    pub fn status(&self, id: &str) -> Result<TaskSnapshot, OrchestratorError> {
        self.lock()
            .get(id)
            .map(Entry::snapshot)
            .ok_or_else(|| OrchestratorError::TaskNotFound(id.to_string()))
    }

    /// All tasks, oldest first
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self.lock().values().map(Entry::snapshot).collect();
        snapshots.sort_by(|a, b| a.task.created_at.cmp(&b.task.created_at));
        snapshots
    }

    /// Remove a finished task. In-flight and unknown tasks are left alone.
    pub fn remove(&self, id: &str) -> Option<Task> {
        let mut tasks = self.lock();
        if tasks.get(id).map(|e| e.in_flight).unwrap_or(true) {
            return None;
        }
        tasks.remove(id).map(|e| e.task)
    }

    /// Drop finished tasks that finished at least `max_age` ago
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut tasks = self.lock();
        let before = tasks.len();

        tasks.retain(|_, entry| {
            if entry.in_flight {
                return true;
            }
            match entry.task.finished_at {
                Some(finished) => (now - finished)
                    .to_std()
                    .map(|age| age < max_age)
                    .unwrap_or(true),
                None => true,
            }
        });

        let removed = before - tasks.len();
        if removed > 0 {
            info!(removed, "Swept finished tasks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn publish(&self, id: &str, generation: Uuid, task: &Task) {
        let mut tasks = self.lock();
        if let Some(entry) = tasks.get_mut(id).filter(|e| e.generation == generation) {
            let mut task = task.clone();
            // A requested cancellation stays visible until the worker finishes
            if entry.cancel.is_cancelled() && task.is_running() {
                task.status = TaskStatus::Cancelled;
            }
            entry.task = task;
        }
    }

    fn release(&self, id: &str, generation: Uuid, final_state: Option<&Task>) {
        let mut tasks = self.lock();
        if let Some(entry) = tasks.get_mut(id).filter(|e| e.generation == generation) {
            match final_state {
                Some(task) => entry.task = task.clone(),
                None if entry.task.is_running() || entry.task.finished_at.is_none() => {
                    warn!(task_id = %id, "Task worker ended without finishing");
                    let status = if entry.cancel.is_cancelled() {
                        TaskStatus::Cancelled
                    } else {
                        TaskStatus::Failed
                    };
                    entry.task.error.get_or_insert_with(|| "task worker terminated".to_string());
                    entry.task.finish(status);
                }
                None => {}
            }
            entry.in_flight = false;
        }
    }
}

/// Worker-side handle to a registered task
pub struct TaskHandle {
    id: String,
    cancel: CancellationToken,
    generation: Uuid,
    registry: TaskRegistry,
    finished: bool,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token fired by [`TaskRegistry::cancel`]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Make `task` the visible state
    pub fn publish(&self, task: &Task) {
        self.registry.publish(&self.id, self.generation, task);
    }

    /// Publish the final state and mark the task no longer in flight
    pub fn finish(mut self, task: &Task) {
        self.registry.release(&self.id, self.generation, Some(task));
        self.finished = true;
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.release(&self.id, self.generation, None);
        }
    }
}
