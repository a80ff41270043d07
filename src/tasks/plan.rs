//! Implementation plans: the task graph for one story.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use storyloop_common::Task;

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Load `.storyloop/plans/<story>.json`.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| OrchestratorError::PlanReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    /// Parse a plan; a bare JSON array of tasks is accepted too.
    pub fn parse(content: &str) -> Result<Self, OrchestratorError> {
        if let Ok(plan) = serde_json::from_str::<Plan>(content) {
            return Ok(plan);
        }
        let tasks: Vec<Task> = serde_json::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse plan: {}", e))?;
        Ok(Self { tasks })
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Reject duplicate ids and dependencies on tasks that don't exist.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(OrchestratorError::DuplicateTask {
                    task: task.id.clone(),
                });
            }
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(OrchestratorError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_object_and_array_forms() {
        let object = r#"{"tasks": [{"id": "T1", "description": "schema", "files": ["db/schema.sql"]}]}"#;
        let plan = Plan::parse(object).unwrap();
        assert_eq!(plan.task_ids(), vec!["T1"]);
        assert_eq!(plan.tasks[0].files, vec!["db/schema.sql"]);

        let array = r#"[{"id": "T1", "description": "a"}, {"id": "T2", "description": "b", "depends_on": ["T1"]}]"#;
        let plan = Plan::parse(array).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].depends_on, vec!["T1"]);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(Plan::parse("not json").is_err());
    }

    #[test]
    fn test_validate_duplicate() {
        let plan = Plan::new(vec![Task::new("T1", "a"), Task::new("T1", "b")]);
        assert!(matches!(
            plan.validate(),
            Err(OrchestratorError::DuplicateTask { task }) if task == "T1"
        ));
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let plan = Plan::new(vec![
            Task::new("T1", "a").with_dependencies(vec!["T9".to_string()]),
        ]);
        assert!(matches!(
            plan.validate(),
            Err(OrchestratorError::UnknownDependency { dependency, .. }) if dependency == "T9"
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = Plan::load(&dir.path().join("S-1.json")).unwrap_err();
        assert!(matches!(err, OrchestratorError::PlanReadFailed { .. }));
    }
}
