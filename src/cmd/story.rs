//! Story maintenance: `storyloop unblock`.

use anyhow::{Context, Result};
use console::style;

use super::super::Cli;
use super::load_config;

/// Return a blocked story to work with a fresh retry budget, forgetting its
/// failure fingerprints and failed task attempts.
pub fn cmd_unblock(cli: &Cli, project_dir: &std::path::Path, story_id: &str) -> Result<()> {
    use storyloop::fingerprint::FingerprintStore;
    use storyloop::scheduler::circuit_breaker::unblock;
    use storyloop::story::{FileStoryStore, StoryStore};
    use storyloop::tasks::FileProgressStore;
    use storyloop_common::StoryStatus;

    let config = load_config(cli, project_dir)?;
    let store = FileStoryStore::new(config.stories_dir());
    let mut story = store
        .load(story_id)
        .with_context(|| format!("Failed to load story {}", story_id))?;

    if story.status != StoryStatus::Blocked {
        println!(
            "{} is not blocked (status: {}).",
            story.id,
            story.status.as_str()
        );
        return Ok(());
    }

    let previous = story.blocked_reason.clone().unwrap_or_default();
    unblock(&mut story);
    store
        .save(&story)
        .with_context(|| format!("Failed to save story {}", story_id))?;

    let cleared = FingerprintStore::new(config.fingerprints_dir()).clear_story(&story.id)?;
    let reset = FileProgressStore::new(config.progress_dir()).reset_failed(&story.id)?;

    tracing::info!(story_id = %story.id, cleared, reset, "story unblocked");

    println!("{} {}", style("Unblocked").green().bold(), story.id);
    if !previous.is_empty() {
        println!("  was: {}", style(previous).dim());
    }
    println!("  cleared {} fingerprint stream(s), reset {} failed task(s)", cleared, reset);
    Ok(())
}
