use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{FingerprintHistory, RepeatCheck};

/// JSON-file persistence for per-stream fingerprint histories.
///
/// Each stream (usually `<story-id>-<phase>`) is stored as
/// `<dir>/<stream>.json`.
pub struct FingerprintStore {
    dir: PathBuf,
}

impl FingerprintStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn stream_key(story_id: &str, phase: &str) -> String {
        format!("{}-{}", story_id, phase)
    }

    fn path_for(&self, stream: &str) -> PathBuf {
        let safe: String = stream
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Load a stream's history, or an empty one if none is recorded.
    pub fn load(&self, stream: &str) -> Result<FingerprintHistory> {
        let path = self.path_for(stream);
        if !path.exists() {
            return Ok(FingerprintHistory::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fingerprint history: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fingerprint history: {}", path.display()))
    }

    pub fn save(&self, stream: &str, history: &FingerprintHistory) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create fingerprint directory: {}", self.dir.display())
        })?;
        let path = self.path_for(stream);
        let content = serde_json::to_string_pretty(history)
            .context("Failed to serialize fingerprint history")?;
        write_atomic(&path, &content)
    }

    /// Record a failure in a stream and persist the updated history.
    pub fn record(&self, stream: &str, error_text: &str, threshold: u32) -> Result<RepeatCheck> {
        let mut history = self.load(stream)?;
        let check = history.check_for_identical_errors(error_text, threshold);
        self.save(stream, &history)?;
        Ok(check)
    }

    /// Forget a stream, e.g. after the phase succeeds or the story is unblocked.
    pub fn clear(&self, stream: &str) -> Result<()> {
        let path = self.path_for(stream);
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| {
                format!("Failed to remove fingerprint history: {}", path.display())
            })?;
        }
        Ok(())
    }

    /// Remove every stream belonging to a story.
    pub fn clear_story(&self, story_id: &str) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let prefix = format!("{}-", story_id);
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?
        {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"));
            if matches {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Write through a sibling temp file and rename so readers never see a
/// partial file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
