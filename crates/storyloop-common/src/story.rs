//! Story: the unit of work driven through the lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::agent::{Concern, Severity};
use crate::{UnknownVariant, lenient};

/// Completion points per phase flag, used by the scheduler's priority model.
pub const RESEARCH_POINTS: u32 = 10;
pub const PLAN_POINTS: u32 = 20;
pub const IMPLEMENTATION_POINTS: u32 = 30;
pub const REVIEWS_POINTS: u32 = 40;

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    #[default]
    Backlog,
    Ready,
    InProgress,
    Blocked,
    Done,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::InProgress => "in-progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }

    /// Blocked and done stories receive no further scheduled work.
    pub fn is_schedulable(&self) -> bool {
        !matches!(self, Self::Blocked | Self::Done)
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "backlog" => Ok(Self::Backlog),
            "ready" => Ok(Self::Ready),
            "in-progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            other => Err(UnknownVariant::new("story status", other)),
        }
    }
}

/// Verdict recorded for one review pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Rejected,
}

impl ReviewDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// One entry of a story's append-only review history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub decision: ReviewDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Concern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Set once a rework pass has consumed this feedback.
    #[serde(default)]
    pub addressed: bool,
}

impl ReviewEntry {
    pub fn new(decision: ReviewDecision, feedback: impl Into<String>) -> Self {
        Self {
            decision,
            severity: None,
            feedback: feedback.into(),
            issues: Vec::new(),
            reviewed_at: Some(Utc::now()),
            addressed: false,
        }
    }

    pub fn with_issues(mut self, issues: Vec<Concern>) -> Self {
        self.severity = issues.iter().map(|c| c.severity).min();
        self.issues = issues;
        self
    }
}

/// A story as persisted in its front matter, plus its markdown body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: StoryStatus,
    /// Declared priority; lower numbers are more urgent.
    #[serde(
        default,
        deserialize_with = "lenient::optional_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<i64>,
    #[serde(default)]
    pub research_complete: bool,
    #[serde(default)]
    pub plan_complete: bool,
    #[serde(default)]
    pub plan_review_complete: bool,
    #[serde(default)]
    pub implementation_complete: bool,
    #[serde(default)]
    pub reviews_complete: bool,
    #[serde(default, deserialize_with = "lenient::count")]
    pub retry_count: i64,
    /// Per-story override of the retry ceiling.
    #[serde(
        default,
        deserialize_with = "lenient::optional_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_retries: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_history: Vec<ReviewEntry>,
    #[serde(skip)]
    pub body: String,
}

impl Story {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: StoryStatus::Backlog,
            priority: None,
            research_complete: false,
            plan_complete: false,
            plan_review_complete: false,
            implementation_complete: false,
            reviews_complete: false,
            retry_count: 0,
            max_retries: None,
            blocked_reason: None,
            blocked_at: None,
            review_history: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sum of fixed points for each completed phase flag.
    pub fn completion_score(&self) -> u32 {
        let mut score = 0;
        if self.research_complete {
            score += RESEARCH_POINTS;
        }
        if self.plan_complete {
            score += PLAN_POINTS;
        }
        if self.implementation_complete {
            score += IMPLEMENTATION_POINTS;
        }
        if self.reviews_complete {
            score += REVIEWS_POINTS;
        }
        score
    }

    pub fn all_phases_complete(&self) -> bool {
        self.research_complete
            && self.plan_complete
            && self.plan_review_complete
            && self.implementation_complete
            && self.reviews_complete
    }

    pub fn latest_review(&self) -> Option<&ReviewEntry> {
        self.review_history.last()
    }

    pub fn append_review(&mut self, entry: ReviewEntry) {
        self.review_history.push(entry);
    }

    /// Flag pairs that violate phase order, e.g. `plan_complete` without
    /// `research_complete`.
    pub fn flag_inconsistencies(&self) -> Vec<String> {
        let flags = [
            ("research_complete", self.research_complete),
            ("plan_complete", self.plan_complete),
            ("plan_review_complete", self.plan_review_complete),
            ("implementation_complete", self.implementation_complete),
            ("reviews_complete", self.reviews_complete),
        ];
        let mut problems = Vec::new();
        for (i, (later, later_set)) in flags.iter().enumerate() {
            if !later_set {
                continue;
            }
            for (earlier, earlier_set) in flags.iter().take(i) {
                if !earlier_set {
                    problems.push(format!("{} is set but {} is not", later, earlier));
                }
            }
        }
        if self.status == StoryStatus::Backlog && self.research_complete {
            problems.push("status is backlog but research_complete is set".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_score() {
        let mut story = Story::new("S-1", "Login");
        assert_eq!(story.completion_score(), 0);
        story.research_complete = true;
        story.plan_complete = true;
        assert_eq!(story.completion_score(), 30);
        story.implementation_complete = true;
        story.reviews_complete = true;
        assert_eq!(story.completion_score(), 100);
    }

    #[test]
    fn test_status_serde_uses_kebab_case() {
        let yaml = serde_yaml::to_string(&StoryStatus::InProgress).unwrap();
        assert_eq!(yaml.trim(), "in-progress");
        let parsed: StoryStatus = serde_yaml::from_str("in-progress").unwrap();
        assert_eq!(parsed, StoryStatus::InProgress);
        assert_eq!("in_progress".parse::<StoryStatus>().unwrap(), StoryStatus::InProgress);
    }

    #[test]
    fn test_story_tolerates_string_counters() {
        let yaml = "id: S-2\nretry_count: \"abc\"\nmax_retries: \"5\"\n";
        let story: Story = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(story.retry_count, 0);
        assert_eq!(story.max_retries, Some(5));
        assert_eq!(story.status, StoryStatus::Backlog);
    }

    #[test]
    fn test_review_entry_severity_is_worst_issue() {
        let entry = ReviewEntry::new(ReviewDecision::ChangesRequested, "fix it").with_issues(vec![
            Concern::new(Severity::Minor, "style", "naming"),
            Concern::new(Severity::Critical, "tests", "missing"),
        ]);
        assert_eq!(entry.severity, Some(Severity::Critical));
        assert!(!entry.addressed);
    }

    #[test]
    fn test_flag_inconsistencies() {
        let mut story = Story::new("S-3", "x");
        story.status = StoryStatus::InProgress;
        assert!(story.flag_inconsistencies().is_empty());
        story.implementation_complete = true;
        let problems = story.flag_inconsistencies();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("implementation_complete"));
    }
}
