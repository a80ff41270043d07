//! Story persistence.
//!
//! Stories live as markdown files with a YAML front matter block holding the
//! fields the orchestrator mutates (status, phase flags, retry counters,
//! blocked reason, review history). The markdown body is free-form.

pub mod store;

use regex::Regex;
use std::sync::LazyLock;
use storyloop_common::Story;

use crate::errors::StoreError;

pub use store::FileStoryStore;

/// Load/save access to stories.
///
/// Writers must be the only process touching a given story; `save` replaces
/// the whole file atomically.
pub trait StoryStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Story, StoreError>;
    fn save(&self, story: &Story) -> Result<(), StoreError>;
    /// Every readable story, sorted by id. Unreadable files are skipped.
    fn list(&self) -> Result<Vec<Story>, StoreError>;
}

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.*?)\s*#*\s*$").expect("heading pattern must compile"));

static LIST_ITEM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s+)?(.+?)\s*$").expect("list item pattern must compile")
});

static CHECKBOX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*+]\s+\[[ xX]\]\s+(.+?)\s*$").expect("checkbox pattern must compile")
});

/// Acceptance criteria listed in a story body.
///
/// Takes list items under an "Acceptance Criteria" heading; without such a
/// heading, falls back to every checkbox item in the body.
pub fn acceptance_criteria(body: &str) -> Vec<String> {
    let mut in_section = false;
    let mut found_section = false;
    let mut criteria = Vec::new();

    for line in body.lines() {
        if let Some(caps) = HEADING_REGEX.captures(line) {
            in_section = caps[1].to_lowercase().contains("acceptance criteria");
            found_section |= in_section;
            continue;
        }
        if in_section && let Some(caps) = LIST_ITEM_REGEX.captures(line) {
            criteria.push(caps[1].to_string());
        }
    }

    if found_section {
        return criteria;
    }

    body.lines()
        .filter_map(|line| CHECKBOX_REGEX.captures(line).map(|c| c[1].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_under_heading() {
        let body = "Intro\n\n## Acceptance Criteria\n\n- [ ] Login form renders\n- [x] Errors shown\n1. Session persisted\n\n## Notes\n- not a criterion\n";
        assert_eq!(
            acceptance_criteria(body),
            vec!["Login form renders", "Errors shown", "Session persisted"]
        );
    }

    #[test]
    fn test_checkbox_fallback() {
        let body = "Do things:\n- [ ] first\n- plain bullet\n* [X] second\n";
        assert_eq!(acceptance_criteria(body), vec!["first", "second"]);
    }

    #[test]
    fn test_empty_section() {
        assert!(acceptance_criteria("### acceptance criteria\n\nnone yet\n").is_empty());
        assert!(acceptance_criteria("").is_empty());
    }
}
