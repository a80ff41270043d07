//! Review retry circuit breaker.
//!
//! A story whose retry counter reaches its ceiling is force-blocked with a
//! reason a human can read straight from the story file.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use storyloop_common::lenient::clamp_count;
use storyloop_common::{Story, StoryStatus};

use crate::storyloop_config::RETRY_HARD_LIMIT;

/// Longest feedback excerpt carried in a blocked reason.
pub const REASON_EXCERPT_CHARS: usize = 100;

static ANSI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ansi pattern must compile")
});

static SPACES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("spaces pattern must compile"));

/// Characters that would corrupt markdown or front matter rendering.
const MARKDOWN_SPECIAL: &[char] = &['`', '*', '#', '[', ']', '|', '<', '>', '~'];

/// The ceiling that applies to this story: its own override, else the
/// global default, held to `[0, min(upper_bound, 999)]`.
pub fn effective_ceiling(story: &Story, global_max_retries: u32, upper_bound: u32) -> u32 {
    let bound = upper_bound.min(RETRY_HARD_LIMIT);
    let raw = story
        .max_retries
        .unwrap_or_else(|| i64::from(global_max_retries));
    clamp_count(raw, bound)
}

/// The story's retry counter held to `[0, 999]`.
pub fn retry_count(story: &Story) -> u32 {
    clamp_count(story.retry_count, RETRY_HARD_LIMIT)
}

pub fn is_tripped(story: &Story, ceiling: u32) -> bool {
    retry_count(story) >= ceiling
}

/// Make free text safe to persist as a one-line reason: drop ANSI sequences
/// and control characters, flatten newlines and remove markdown specials.
pub fn sanitize(text: &str) -> String {
    let without_ansi = ANSI_REGEX.replace_all(text, "");
    let flattened: String = without_ansi
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() => None,
            c if MARKDOWN_SPECIAL.contains(&c) => None,
            c => Some(c),
        })
        .collect();
    SPACES_REGEX.replace_all(&flattened, " ").trim().to_string()
}

/// Cap `text` at `max` characters, ending with `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect::<String>().trim_end().to_string();
    out.push_str("...");
    out
}

/// Sanitized excerpt of the latest review feedback, or `unknown`.
pub fn feedback_excerpt(story: &Story) -> String {
    let excerpt = story
        .latest_review()
        .map(|entry| sanitize(&entry.feedback))
        .unwrap_or_default();
    if excerpt.is_empty() {
        "unknown".to_string()
    } else {
        truncate_chars(&excerpt, REASON_EXCERPT_CHARS)
    }
}

pub fn blocked_reason(story: &Story, ceiling: u32) -> String {
    format!(
        "Max review retries ({}/{}) reached: {}",
        retry_count(story),
        ceiling,
        feedback_excerpt(story)
    )
}

/// Move a story to `blocked` with a sanitized reason.
pub fn block(story: &mut Story, reason: &str, now: DateTime<Utc>) {
    story.status = StoryStatus::Blocked;
    story.blocked_reason = Some(sanitize(reason));
    story.blocked_at = Some(now);
}

/// Undo a block: back to work with a fresh retry budget.
pub fn unblock(story: &mut Story) {
    story.status = StoryStatus::InProgress;
    story.blocked_reason = None;
    story.blocked_at = None;
    story.retry_count = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloop_common::{ReviewDecision, ReviewEntry};

    fn story(retry_count: i64, max_retries: Option<i64>) -> Story {
        let mut s = Story::new("S-1", "Login");
        s.retry_count = retry_count;
        s.max_retries = max_retries;
        s
    }

    #[test]
    fn test_ceiling_prefers_story_override() {
        assert_eq!(effective_ceiling(&story(0, Some(5)), 3, 999), 5);
        assert_eq!(effective_ceiling(&story(0, None), 3, 999), 3);
    }

    #[test]
    fn test_ceiling_clamped() {
        assert_eq!(effective_ceiling(&story(0, Some(-2)), 3, 999), 0);
        assert_eq!(effective_ceiling(&story(0, Some(50_000)), 3, 999), 999);
        assert_eq!(effective_ceiling(&story(0, Some(50)), 3, 10), 10);
        assert_eq!(effective_ceiling(&story(0, Some(2000)), 3, 5000), 999);
    }

    #[test]
    fn test_trips_at_ceiling_not_below() {
        assert!(!is_tripped(&story(2, None), 3));
        assert!(is_tripped(&story(3, None), 3));
        assert!(is_tripped(&story(7, None), 3));
        assert!(!is_tripped(&story(-5, None), 1));
        assert_eq!(retry_count(&story(5000, None)), 999);
    }

    #[test]
    fn test_sanitize() {
        let raw = "\x1b[31mFAIL\x1b[0m: `auth` **broken**\n# see [link](x) | <b>~</b>\x07";
        assert_eq!(sanitize(raw), "FAIL: auth broken see link(x) b/b");
    }

    #[test]
    fn test_sanitize_preserves_plain_text() {
        assert_eq!(sanitize("Missing rate limit on /login (429s)"), "Missing rate limit on /login (429s)");
    }

    #[test]
    fn test_reason_uses_latest_feedback() {
        let mut s = story(3, None);
        s.append_review(ReviewEntry::new(ReviewDecision::ChangesRequested, "old"));
        s.append_review(ReviewEntry::new(
            ReviewDecision::ChangesRequested,
            format!("**Tokens** leak\n{}", "x".repeat(200)),
        ));
        let reason = blocked_reason(&s, 3);
        assert!(reason.starts_with("Max review retries (3/3) reached: Tokens leak x"));
        assert!(reason.ends_with("..."));
        let excerpt = reason.trim_start_matches("Max review retries (3/3) reached: ");
        assert!(excerpt.chars().count() <= REASON_EXCERPT_CHARS);
    }

    #[test]
    fn test_reason_without_history() {
        assert_eq!(blocked_reason(&story(3, Some(3)), 3), "Max review retries (3/3) reached: unknown");
    }

    #[test]
    fn test_block_and_unblock() {
        let mut s = story(3, None);
        let now = Utc::now();
        block(&mut s, "Max review retries (3/3) reached: unknown", now);
        assert_eq!(s.status, StoryStatus::Blocked);
        assert_eq!(s.blocked_at, Some(now));

        unblock(&mut s);
        assert_eq!(s.status, StoryStatus::InProgress);
        assert_eq!(s.retry_count, 0);
        assert!(s.blocked_reason.is_none());
    }
}
