//! Error fingerprinting.
//!
//! Failure text is normalized (see [`normalize`]) and hashed so that two
//! failures with the same root cause share one identity. A [`FingerprintHistory`]
//! tracks the most recent distinct fingerprints for one retry stream and
//! reports how many times in a row the latest one has repeated.

pub mod normalize;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use normalize::normalize_error;
pub use store::FingerprintStore;

/// Maximum number of distinct fingerprints retained per stream.
pub const MAX_HISTORY: usize = 10;

/// Maximum length of the human-readable preview.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Default consecutive-repeat count at which a stream is considered looping.
pub const DEFAULT_IDENTICAL_ERROR_THRESHOLD: u32 = 3;

const FAILURE_MARKERS: &[&str] = &["error", "fail", "panic", "exception", "fatal"];

/// Hex-encoded SHA-256 digest of the normalized failure text.
pub fn fingerprint(text: &str) -> String {
    let normalized = normalize_error(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short preview of failure text for operator display.
///
/// Prefers the first line that carries a failure marker, falling back to the
/// first non-empty line.
pub fn preview(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let chosen = lines
        .iter()
        .find(|line| {
            let lower = line.to_lowercase();
            FAILURE_MARKERS.iter().any(|m| lower.contains(m))
        })
        .or_else(|| lines.first())
        .copied()
        .unwrap_or("");

    truncate_chars(chosen, PREVIEW_MAX_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// One distinct fingerprint seen in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Consecutive occurrences while this was the most recent fingerprint.
    pub consecutive: u32,
    pub preview: String,
}

/// Outcome of recording one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatCheck {
    pub hash: String,
    pub consecutive: u32,
    pub threshold: u32,
    pub is_looping: bool,
    pub preview: String,
}

/// Bounded history of recent distinct fingerprints for one retry stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FingerprintHistory {
    #[serde(default)]
    pub entries: Vec<FingerprintRecord>,
}

impl FingerprintHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a failure and report its consecutive-repeat count.
    ///
    /// A match against the most recent entry increments its count; anything
    /// else becomes the new most recent entry with a count of 1. A fingerprint
    /// seen earlier in the history is moved to the end rather than duplicated.
    pub fn check_for_identical_errors(&mut self, error_text: &str, threshold: u32) -> RepeatCheck {
        self.record_at(error_text, threshold, Utc::now())
    }

    fn record_at(&mut self, error_text: &str, threshold: u32, now: DateTime<Utc>) -> RepeatCheck {
        let hash = fingerprint(error_text);

        let repeated = self.entries.last().is_some_and(|last| last.hash == hash);
        if repeated {
            if let Some(last) = self.entries.last_mut() {
                last.consecutive = last.consecutive.saturating_add(1);
                last.last_seen = now;
            }
        } else {
            let first_seen = match self.entries.iter().position(|e| e.hash == hash) {
                Some(idx) => self.entries.remove(idx).first_seen,
                None => now,
            };
            self.entries.push(FingerprintRecord {
                hash: hash.clone(),
                first_seen,
                last_seen: now,
                consecutive: 1,
                preview: preview(error_text),
            });
            if self.entries.len() > MAX_HISTORY {
                let excess = self.entries.len() - MAX_HISTORY;
                self.entries.drain(..excess);
            }
        }

        let (consecutive, preview) = self
            .entries
            .last()
            .map(|e| (e.consecutive, e.preview.clone()))
            .unwrap_or((1, String::new()));

        RepeatCheck {
            hash,
            consecutive,
            threshold,
            is_looping: threshold > 0 && consecutive >= threshold,
            preview,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_volatile_fields() {
        let a = fingerprint("Error in /Users/dev/src/app.ts:123 at 2024-01-15T10:00:00Z");
        let b = fingerprint("Error in /home/ci/src/app.ts:9 at 2026-03-02T08:15:44Z");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint("Different failure entirely"));
    }

    #[test]
    fn test_preview_prefers_failure_lines() {
        let text = "Compiling app v0.1.0\nRunning 12 tests\nerror: test auth::login failed\n";
        assert_eq!(preview(text), "error: test auth::login failed");
        assert_eq!(preview("just output\nmore"), "just output");
        assert_eq!(preview(""), "");
    }

    #[test]
    fn test_preview_is_bounded() {
        let long = format!("error: {}", "x".repeat(300));
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_MAX_CHARS);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_consecutive_count_increments_and_resets() {
        let mut history = FingerprintHistory::new();
        let first = history.check_for_identical_errors("tests failed at 10:00:01", 3);
        assert_eq!(first.consecutive, 1);
        assert!(!first.is_looping);

        let second = history.check_for_identical_errors("tests failed at 11:12:13", 3);
        assert_eq!(second.consecutive, 2);

        let third = history.check_for_identical_errors("tests failed at 12:00:00", 3);
        assert_eq!(third.consecutive, 3);
        assert!(third.is_looping);

        let other = history.check_for_identical_errors("lint failed", 3);
        assert_eq!(other.consecutive, 1);
        assert!(!other.is_looping);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_repeat_of_older_entry_moves_to_end() {
        let mut history = FingerprintHistory::new();
        history.check_for_identical_errors("alpha failed", 3);
        history.check_for_identical_errors("beta failed", 3);
        let again = history.check_for_identical_errors("alpha failed", 3);

        assert_eq!(again.consecutive, 1);
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries.last().map(|e| e.preview.as_str()), Some("alpha failed"));
    }

    #[test]
    fn test_history_is_capped() {
        let mut history = FingerprintHistory::new();
        for i in 0..15u8 {
            let text = format!("failure kind {}", (b'a' + i) as char);
            history.check_for_identical_errors(&text, 3);
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history.entries[0].preview, "failure kind f");
    }

    #[test]
    fn test_zero_threshold_never_loops() {
        let mut history = FingerprintHistory::new();
        for _ in 0..5 {
            assert!(!history.check_for_identical_errors("same", 0).is_looping);
        }
    }
}
