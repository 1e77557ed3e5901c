//! Task Registry Integration Tests
//!
//! Concurrent registration, cancellation and sweeping of tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::time::Duration;

use k8helper::core::{OrchestratorError, TaskRegistry};
use k8helper::domain::{Task, TaskStatus};

#[test]
fn test_concurrent_duplicate_ids_admit_one() {
    let registry = TaskRegistry::new();
    let admitted = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);
    let start = Barrier::new(8);
    let attempted = Barrier::new(8);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                start.wait();
                let outcome = registry.create(Task::new("shared", "q", true));
                // The winner stays in flight until every thread has tried
                attempted.wait();
                match outcome {
                    Ok(_handle) => {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(OrchestratorError::DuplicateTaskId(id)) => {
                        assert_eq!(id, "shared");
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected error: {}", other),
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(rejected.load(Ordering::SeqCst), 7);
}

#[test]
fn test_distinct_ids_are_independent() {
    let registry = TaskRegistry::new();

    std::thread::scope(|scope| {
        for i in 0..16 {
            let registry = registry.clone();
            scope.spawn(move || {
                let id = format!("task-{}", i);
                let handle = registry.create(Task::new(id.as_str(), "q", true)).unwrap();
                let mut task = Task::new(id.as_str(), "q", true);
                task.finish(TaskStatus::Completed);
                handle.finish(&task);
            });
        }
    });

    assert_eq!(registry.len(), 16);
    for snapshot in registry.list() {
        assert!(!snapshot.in_flight);
        assert_eq!(snapshot.task.status, TaskStatus::Completed);
    }
}

#[test]
fn test_cancel_one_leaves_others_running() {
    let registry = TaskRegistry::new();
    let a = registry.create(Task::new("a", "q", true)).unwrap();
    let b = registry.create(Task::new("b", "q", true)).unwrap();

    assert!(registry.cancel("a"));
    assert!(a.is_cancelled());
    assert!(!b.is_cancelled());
    assert_eq!(registry.status("b").unwrap().task.status, TaskStatus::Running);
}

#[test]
fn test_cancel_after_finish_reports_not_found() {
    let registry = TaskRegistry::new();
    let handle = registry.create(Task::new("a", "q", true)).unwrap();
    let mut task = Task::new("a", "q", true);
    task.finish(TaskStatus::Completed);
    handle.finish(&task);

    assert!(!registry.cancel("a"));
    assert_eq!(registry.status("a").unwrap().task.status, TaskStatus::Completed);
}

#[test]
fn test_status_unknown_task() {
    let registry = TaskRegistry::new();
    assert_eq!(
        registry.status("nope").unwrap_err(),
        OrchestratorError::TaskNotFound("nope".to_string())
    );
}

#[test]
fn test_sweep_keeps_in_flight_tasks() {
    let registry = TaskRegistry::new();
    let _running = registry.create(Task::new("running", "q", true)).unwrap();

    assert_eq!(registry.sweep(Duration::ZERO), 0);
    assert_eq!(registry.len(), 1);
}
