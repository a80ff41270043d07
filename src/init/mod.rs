//! `storyloop init`: lay out the per-project state directory.
//!
//! ```text
//! .storyloop/
//! ├── storyloop.toml   # Configuration (defaults written on first init)
//! ├── plans/           # <story-id>.json implementation plans
//! ├── progress/        # Per-story task progress
//! ├── fingerprints/    # Failure fingerprint histories
//! └── logs/            # Daily JSON logs
//! stories/             # Story markdown files (configurable)
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::storyloop_config::{CONFIG_FILE, STORYLOOP_DIR, StoryloopToml};

const SUBDIRS: &[&str] = &["plans", "progress", "fingerprints", "logs"];

#[derive(Debug)]
pub struct InitResult {
    pub storyloop_dir: PathBuf,
    pub stories_dir: PathBuf,
    /// False when the directory already existed and was only completed.
    pub created: bool,
}

pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let storyloop_dir = project_dir.join(STORYLOOP_DIR);
    let created = !storyloop_dir.exists();

    std::fs::create_dir_all(&storyloop_dir)
        .with_context(|| format!("Failed to create directory: {}", storyloop_dir.display()))?;
    for sub in SUBDIRS {
        let dir = storyloop_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_file = storyloop_dir.join(CONFIG_FILE);
    let toml = if config_file.exists() {
        StoryloopToml::load(&config_file)?
    } else {
        let toml = StoryloopToml::default();
        toml.save(&config_file)?;
        toml
    };

    let stories_dir = project_dir.join(&toml.project.stories_dir);
    std::fs::create_dir_all(&stories_dir)
        .with_context(|| format!("Failed to create directory: {}", stories_dir.display()))?;

    Ok(InitResult {
        storyloop_dir,
        stories_dir,
        created,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STORYLOOP_DIR).exists()
}
