//! Task progress persistence, so an interrupted run resumes where it stopped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use storyloop_common::TaskStatus;

use crate::fingerprint::store::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryProgress {
    pub story_id: String,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl StoryProgress {
    pub fn record(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.record(task_id).map(|r| r.status)
    }
}

/// Durable per-story task status.
pub trait TaskProgressStore: Send + Sync {
    fn get_progress(&self, story_id: &str) -> Result<StoryProgress>;

    /// Ensure a record exists for every id; existing records are kept so a
    /// rerun resumes instead of starting over.
    fn init_progress(&self, story_id: &str, task_ids: &[String]) -> Result<StoryProgress>;

    fn update_progress(
        &self,
        story_id: &str,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
        attempts: u32,
    ) -> Result<()>;
}

/// `<dir>/<story-id>.json` per story.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    dir: PathBuf,
}

impl FileProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, story_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", story_id))
    }

    fn write(&self, progress: &StoryProgress) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create progress directory: {}", self.dir.display())
        })?;
        let content =
            serde_json::to_string_pretty(progress).context("Failed to serialize task progress")?;
        write_atomic(&self.path_for(&progress.story_id), &content)
    }

    /// Put failed tasks back to pending with a fresh attempt budget.
    /// Returns how many were reset.
    pub fn reset_failed(&self, story_id: &str) -> Result<usize> {
        let mut progress = self.get_progress(story_id)?;
        let mut reset = 0;
        for record in progress
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Failed)
        {
            record.status = TaskStatus::Pending;
            record.attempts = 0;
            record.error = None;
            record.updated_at = Utc::now();
            reset += 1;
        }
        if reset > 0 {
            self.write(&progress)?;
        }
        Ok(reset)
    }
}

impl TaskProgressStore for FileProgressStore {
    fn get_progress(&self, story_id: &str) -> Result<StoryProgress> {
        let path = self.path_for(story_id);
        if !path.exists() {
            return Ok(StoryProgress {
                story_id: story_id.to_string(),
                tasks: Vec::new(),
            });
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read progress file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse progress file: {}", path.display()))
    }

    fn init_progress(&self, story_id: &str, task_ids: &[String]) -> Result<StoryProgress> {
        let mut progress = self.get_progress(story_id)?;
        let mut changed = progress.tasks.is_empty() && !task_ids.is_empty();
        for id in task_ids {
            if progress.record(id).is_none() {
                progress.tasks.push(TaskRecord {
                    id: id.clone(),
                    status: TaskStatus::Pending,
                    attempts: 0,
                    error: None,
                    updated_at: Utc::now(),
                });
                changed = true;
            }
        }
        if changed {
            self.write(&progress)?;
        }
        Ok(progress)
    }

    fn update_progress(
        &self,
        story_id: &str,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
        attempts: u32,
    ) -> Result<()> {
        let mut progress = self.get_progress(story_id)?;
        let record = TaskRecord {
            id: task_id.to_string(),
            status,
            attempts,
            error: error.map(str::to_string),
            updated_at: Utc::now(),
        };
        match progress.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(existing) => *existing = record,
            None => progress.tasks.push(record),
        }
        self.write(&progress)
    }
}
