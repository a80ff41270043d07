//! Typed error hierarchy for storyloop.
//!
//! Three top-level enums cover the three subsystems:
//! - `OrchestratorError`: task dependency executor and version-control failures
//! - `PhaseError`: per-phase execution failures
//! - `StoreError`: story persistence failures

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the task dependency executor.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Circular dependency in plan for story {story_id}: no runnable task among {remaining:?}")]
    CircularDependency {
        story_id: String,
        remaining: Vec<String>,
    },

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task id {task} in plan")]
    DuplicateTask { task: String },

    #[error("Failed to read plan file at {path}: {source}")]
    PlanReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task progress error for story {story_id}: {source}")]
    Progress {
        story_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Version control error: {0}")]
    Vcs(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase {phase} cannot run for story {story_id} in its current state")]
    NotRunnable { phase: String, story_id: String },

    #[error("Unsupported agent role '{role}'")]
    UnsupportedRole { role: String },

    #[error("No agent registered under '{id}'")]
    AgentNotRegistered { id: String },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the story store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Story {id} not found")]
    NotFound { id: String },

    #[error("Malformed story file {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
