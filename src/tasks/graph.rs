//! Task selection over the dependency graph.

use std::collections::{HashMap, HashSet};
use storyloop_common::{Task, TaskStatus};

use crate::errors::OrchestratorError;

fn dependencies_completed(task: &Task, status_of: &HashMap<&str, TaskStatus>) -> bool {
    task.depends_on
        .iter()
        .all(|dep| status_of.get(dep.as_str()) == Some(&TaskStatus::Completed))
}

/// The next runnable task: `in_progress` tasks are resumed before any
/// `pending` task is started, and a task only runs once every dependency is
/// `completed`. Ties go to plan order.
pub fn get_next_task(tasks: &[Task]) -> Option<&Task> {
    let status_of: HashMap<&str, TaskStatus> =
        tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();

    let runnable = |wanted: TaskStatus| {
        tasks
            .iter()
            .find(|t| t.status == wanted && dependencies_completed(t, &status_of))
    };

    runnable(TaskStatus::InProgress).or_else(|| runnable(TaskStatus::Pending))
}

/// Ids of tasks that are neither completed nor failed.
pub fn incomplete_ids(tasks: &[Task]) -> Vec<String> {
    tasks
        .iter()
        .filter(|t| !t.status.is_terminal())
        .map(|t| t.id.clone())
        .collect()
}

/// Like [`get_next_task`], but an empty result with incomplete tasks left is
/// a circular dependency.
pub fn next_or_cycle<'a>(
    story_id: &str,
    tasks: &'a [Task],
) -> Result<Option<&'a Task>, OrchestratorError> {
    match get_next_task(tasks) {
        Some(task) => Ok(Some(task)),
        None => {
            let remaining = incomplete_ids(tasks);
            if remaining.is_empty() {
                Ok(None)
            } else {
                Err(OrchestratorError::CircularDependency {
                    story_id: story_id.to_string(),
                    remaining,
                })
            }
        }
    }
}

/// Non-terminal tasks that depend, directly or transitively, on `failed_id`.
pub fn dependents_of(tasks: &[Task], failed_id: &str) -> Vec<String> {
    let mut blocked: HashSet<String> = HashSet::new();
    blocked.insert(failed_id.to_string());
    let mut out = Vec::new();

    loop {
        let mut changed = false;
        for task in tasks {
            if task.status.is_terminal() || blocked.contains(&task.id) {
                continue;
            }
            if task.depends_on.iter().any(|d| blocked.contains(d)) {
                blocked.insert(task.id.clone());
                out.push(task.id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    out
}

/// Order in which tasks would run if every task succeeded.
pub fn simulate_order(story_id: &str, tasks: &[Task]) -> Result<Vec<String>, OrchestratorError> {
    let mut sim: Vec<Task> = tasks.to_vec();
    for task in &mut sim {
        if task.status != TaskStatus::Completed {
            task.status = TaskStatus::Pending;
        }
    }

    let mut order = Vec::new();
    while let Some(next) = next_or_cycle(story_id, &sim)? {
        let id = next.id.clone();
        if let Some(task) = sim.iter_mut().find(|t| t.id == id) {
            task.status = TaskStatus::Completed;
        }
        order.push(id);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str], status: TaskStatus) -> Task {
        let mut t = Task::new(id, format!("task {}", id))
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect());
        t.status = status;
        t
    }

    #[test]
    fn test_dependency_order() {
        let mut tasks = vec![
            task("T1", &[], TaskStatus::Pending),
            task("T2", &["T1"], TaskStatus::Pending),
        ];
        assert_eq!(get_next_task(&tasks).map(|t| t.id.as_str()), Some("T1"));

        tasks[0].status = TaskStatus::Completed;
        assert_eq!(get_next_task(&tasks).map(|t| t.id.as_str()), Some("T2"));

        tasks[1].status = TaskStatus::Completed;
        assert!(get_next_task(&tasks).is_none());
    }

    #[test]
    fn test_in_progress_resumes_first() {
        let tasks = vec![
            task("T1", &[], TaskStatus::Pending),
            task("T2", &[], TaskStatus::InProgress),
        ];
        assert_eq!(get_next_task(&tasks).map(|t| t.id.as_str()), Some("T2"));
    }

    #[test]
    fn test_in_progress_with_incomplete_dependency_waits() {
        let tasks = vec![
            task("T1", &[], TaskStatus::Pending),
            task("T2", &["T1"], TaskStatus::InProgress),
        ];
        assert_eq!(get_next_task(&tasks).map(|t| t.id.as_str()), Some("T1"));
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![
            task("T1", &["T2"], TaskStatus::Pending),
            task("T2", &["T1"], TaskStatus::Pending),
            task("T3", &[], TaskStatus::Completed),
        ];
        match next_or_cycle("S-1", &tasks) {
            Err(OrchestratorError::CircularDependency { remaining, .. }) => {
                assert_eq!(remaining, vec!["T1", "T2"]);
            }
            other => panic!("expected circular dependency, got {:?}", other.map(|t| t.map(|t| t.id.clone()))),
        }
    }

    #[test]
    fn test_all_terminal_is_done() {
        let tasks = vec![
            task("T1", &[], TaskStatus::Completed),
            task("T2", &[], TaskStatus::Failed),
        ];
        assert!(next_or_cycle("S-1", &tasks).unwrap().is_none());
    }

    #[test]
    fn test_dependents_are_transitive() {
        let tasks = vec![
            task("T1", &[], TaskStatus::Failed),
            task("T2", &["T1"], TaskStatus::Pending),
            task("T3", &["T2"], TaskStatus::Pending),
            task("T4", &[], TaskStatus::Pending),
        ];
        assert_eq!(dependents_of(&tasks, "T1"), vec!["T2", "T3"]);
    }

    #[test]
    fn test_simulate_order() {
        let tasks = vec![
            task("T3", &["T1", "T2"], TaskStatus::Pending),
            task("T1", &[], TaskStatus::Pending),
            task("T2", &["T1"], TaskStatus::Failed),
        ];
        assert_eq!(simulate_order("S-1", &tasks).unwrap(), vec!["T1", "T2", "T3"]);

        let cyclic = vec![task("A", &["B"], TaskStatus::Pending), task("B", &["A"], TaskStatus::Pending)];
        assert!(simulate_order("S-1", &cyclic).is_err());
    }
}
