//! Minimal per-task context handed to the implementing agent.

use std::path::{Path, PathBuf};
use storyloop_common::{Story, Task};

use crate::story::acceptance_criteria;

pub const TRUNCATION_MARKER: &str = "\n[...truncated]";
/// Criteria included when none mention the task's files.
pub const GENERIC_CRITERIA_COUNT: usize = 3;
pub const MAX_FILE_CHARS: usize = 12_000;

/// Shortest file stem that counts as a textual match.
const MIN_STEM_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub story_id: String,
    pub story_title: String,
    pub task: Task,
    pub criteria: Vec<String>,
    pub files: Vec<FileSnapshot>,
    pub conventions: Option<String>,
    /// Failure text from the previous attempt of this task.
    pub previous_error: Option<String>,
}

/// Cut `text` to at most `max_chars` characters, appending the truncation
/// marker when anything was dropped.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}{}", kept, TRUNCATION_MARKER)
}

fn mentions_file(criterion: &str, file: &str) -> bool {
    let lower = criterion.to_lowercase();
    let file = file.trim().trim_start_matches("./").to_lowercase();
    if file.is_empty() {
        return false;
    }
    if lower.contains(&file) {
        return true;
    }
    let path = Path::new(&file);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or("");
    (name.len() >= MIN_STEM_LEN && lower.contains(name))
        || (stem.len() >= MIN_STEM_LEN && !stem.contains('*') && lower.contains(stem))
}

/// Criteria that mention one of the task's files by path, name or stem; if
/// none do, the first few criteria as generic guidance.
pub fn related_criteria(criteria: &[String], files: &[String]) -> Vec<String> {
    let related: Vec<String> = criteria
        .iter()
        .filter(|c| files.iter().any(|f| mentions_file(c, f)))
        .cloned()
        .collect();
    if !related.is_empty() {
        return related;
    }
    criteria.iter().take(GENERIC_CRITERIA_COUNT).cloned().collect()
}

fn read_existing(working_dir: &Path, files: &[String]) -> Vec<FileSnapshot> {
    files
        .iter()
        .filter(|f| !f.contains(['*', '?', '[']))
        .filter_map(|f| {
            let full: PathBuf = working_dir.join(f);
            if !full.is_file() {
                return None;
            }
            let content = std::fs::read_to_string(&full).ok()?;
            Some(FileSnapshot {
                path: f.clone(),
                content: truncate_with_marker(&content, MAX_FILE_CHARS),
            })
        })
        .collect()
}

impl TaskContext {
    pub fn build(
        story: &Story,
        task: &Task,
        working_dir: &Path,
        conventions: Option<&str>,
        convention_max_chars: usize,
    ) -> Self {
        let criteria = acceptance_criteria(&story.body);
        Self {
            story_id: story.id.clone(),
            story_title: story.title.clone(),
            task: task.clone(),
            criteria: related_criteria(&criteria, &task.files),
            files: read_existing(working_dir, &task.files),
            conventions: conventions
                .filter(|c| !c.trim().is_empty())
                .map(|c| truncate_with_marker(c, convention_max_chars)),
            previous_error: None,
        }
    }

    pub fn with_previous_error(mut self, error: Option<String>) -> Self {
        self.previous_error = error.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn to_prompt(&self) -> String {
        let mut prompt = format!(
            "# Task {} for story {} - {}\n\n{}\n",
            self.task.id, self.story_id, self.story_title, self.task.description
        );

        prompt.push_str("\n## Allowed Files\n\n");
        if self.task.files.is_empty() {
            prompt.push_str("(no restriction declared)\n");
        } else {
            prompt.push_str("Only modify these files:\n");
            for file in &self.task.files {
                prompt.push_str(&format!("- {}\n", file));
            }
        }

        if !self.criteria.is_empty() {
            prompt.push_str("\n## Acceptance Criteria\n\n");
            for criterion in &self.criteria {
                prompt.push_str(&format!("- {}\n", criterion));
            }
        }

        for file in &self.files {
            prompt.push_str(&format!(
                "\n## Current contents of {}\n\n```\n{}\n```\n",
                file.path, file.content
            ));
        }

        if let Some(conventions) = &self.conventions {
            prompt.push_str(&format!("\n## Project Conventions\n\n{}\n", conventions));
        }

        if let Some(error) = &self.previous_error {
            prompt.push_str(&format!(
                "\n## Previous Attempt Failed\n\n{}\n\nFix the cause before continuing.\n",
                error.trim()
            ));
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn criteria() -> Vec<String> {
        vec![
            "Login form validates email".to_string(),
            "Session stored in src/session.ts".to_string(),
            "Logout clears the session".to_string(),
            "Errors are shown inline".to_string(),
        ]
    }

    #[test]
    fn test_related_by_path_and_stem() {
        let related = related_criteria(&criteria(), &["src/session.ts".to_string()]);
        assert_eq!(
            related,
            vec!["Session stored in src/session.ts", "Logout clears the session"]
        );
    }

    #[test]
    fn test_falls_back_to_first_three() {
        let related = related_criteria(&criteria(), &["db/schema.sql".to_string()]);
        assert_eq!(related.len(), 3);
        assert_eq!(related[0], "Login form validates email");
    }

    #[test]
    fn test_short_stems_do_not_match() {
        let related = related_criteria(&criteria(), &["a/in.rs".to_string()]);
        assert_eq!(related.len(), 3);
    }

    #[test]
    fn test_truncate_with_marker() {
        assert_eq!(truncate_with_marker("short", 10), "short");
        assert_eq!(truncate_with_marker("abcdef", 3), "abc\n[...truncated]");
    }

    #[test]
    fn test_build_reads_existing_files_and_conventions() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/session.ts"), "export const x = 1;").unwrap();

        let story = Story::new("S-1", "Login")
            .with_body("## Acceptance Criteria\n- Session stored in src/session.ts\n");
        let task = Task::new("T1", "store session")
            .with_files(vec!["src/session.ts".to_string(), "src/new.ts".to_string()]);
        let conventions = "x".repeat(50);

        let ctx = TaskContext::build(&story, &task, dir.path(), Some(&conventions), 10)
            .with_previous_error(Some("tests failed".to_string()));

        assert_eq!(ctx.files.len(), 1);
        assert_eq!(ctx.files[0].path, "src/session.ts");
        assert!(ctx.conventions.as_deref().unwrap().ends_with("[...truncated]"));

        let prompt = ctx.to_prompt();
        assert!(prompt.contains("# Task T1 for story S-1"));
        assert!(prompt.contains("- src/new.ts"));
        assert!(prompt.contains("export const x = 1;"));
        assert!(prompt.contains("## Previous Attempt Failed"));
    }
}
