use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// One executed action, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub story_id: String,
    pub action: String,
    pub outcome: String,
    pub agent_invocations: u32,
    pub timestamp: DateTime<Utc>,
}

/// Append-only `story|action|outcome|invocations|timestamp` log of executed
/// actions.
pub struct ActionJournal {
    path: PathBuf,
}

impl ActionJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(
        &self,
        story_id: &str,
        action: &str,
        outcome: &str,
        agent_invocations: u32,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }
        let line = format!(
            "{}|{}|{}|{}|{}\n",
            story_id,
            action,
            outcome.replace(['|', '\n'], " "),
            agent_invocations,
            Utc::now().to_rfc3339()
        );

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open journal file")?
            .write_all(line.as_bytes())
            .context("Failed to write journal entry")?;

        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).context("Failed to read journal file")?;

        Ok(content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split('|').collect();
                if parts.len() != 5 {
                    return None;
                }
                Some(JournalEntry {
                    story_id: parts[0].to_string(),
                    action: parts[1].to_string(),
                    outcome: parts[2].to_string(),
                    agent_invocations: parts[3].parse().unwrap_or(0),
                    timestamp: DateTime::parse_from_rfc3339(parts[4])
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect())
    }

    pub fn entries_for(&self, story_id: &str) -> Result<Vec<JournalEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.story_id == story_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_read_back() {
        let dir = tempdir().unwrap();
        let journal = ActionJournal::new(dir.path().join("logs/journal.log"));

        journal.record("S-1", "research", "completed", 1).unwrap();
        journal
            .record("S-2", "review", "failed: a | b\nc", 3)
            .unwrap();

        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].outcome, "failed: a   b c");
        assert_eq!(entries[1].agent_invocations, 3);
        assert_eq!(journal.entries_for("S-1").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempdir().unwrap();
        assert!(ActionJournal::new(dir.path().join("none.log")).entries().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        std::fs::write(&path, "garbage\nS-1|plan|completed|1|not-a-date\n").unwrap();
        assert!(ActionJournal::new(&path).entries().unwrap().is_empty());
    }
}
