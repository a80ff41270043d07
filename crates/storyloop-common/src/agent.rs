//! Agent output types shared by the phase executor and the consensus engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::UnknownVariant;

/// Severity of a concern raised by an agent.
///
/// Severities are ordered from most to least severe, so `min()` over a set of
/// concerns yields the worst one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Stops the phase from completing.
    Blocker,
    Critical,
    #[default]
    Major,
    Minor,
}

impl Severity {
    /// Whether a concern of this severity blocks agreement.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocker)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocker => "blocker",
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blocker" | "blocking" => Ok(Self::Blocker),
            "critical" | "error" => Ok(Self::Critical),
            "major" | "warning" => Ok(Self::Major),
            "minor" | "info" | "note" => Ok(Self::Minor),
            other => Err(UnknownVariant::new("severity", other)),
        }
    }
}

/// A single issue raised by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    pub description: String,
}

impl Concern {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            description: description.into(),
        }
    }

    pub fn blocker(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Blocker, category, description)
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            write!(f, "[{}] {}", self.severity, self.description)
        } else {
            write!(f, "[{}] {}: {}", self.severity, self.category, self.description)
        }
    }
}

/// The result of one agent invocation within a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Agent identifier within the phase (e.g. `security`).
    pub id: String,
    /// Role tag, such as a reviewer perspective.
    pub role: String,
    /// Free-text content produced by the agent.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub concerns: Vec<Concern>,
    pub approved: bool,
}

impl AgentOutput {
    pub fn new(id: impl Into<String>, role: impl Into<String>, approved: bool) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            content: String::new(),
            concerns: Vec::new(),
            approved,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_concern(mut self, concern: Concern) -> Self {
        self.concerns.push(concern);
        self
    }

    pub fn with_concerns(mut self, concerns: impl IntoIterator<Item = Concern>) -> Self {
        self.concerns.extend(concerns);
        self
    }

    pub fn has_blocking_concern(&self) -> bool {
        self.concerns.iter().any(Concern::is_blocking)
    }

    pub fn blocking_concerns(&self) -> impl Iterator<Item = &Concern> {
        self.concerns.iter().filter(|c| c.is_blocking())
    }

    /// The most severe concern level raised, if any.
    pub fn highest_severity(&self) -> Option<Severity> {
        self.concerns.iter().map(|c| c.severity).min()
    }
}

/// Outcome of iterating a set of agent outputs toward agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub reached: bool,
    pub iterations: u32,
    pub outputs: Vec<AgentOutput>,
    /// Set when the iteration budget ran out with blocking concerns left.
    pub requires_human_review: bool,
}

impl ConsensusResult {
    pub fn unresolved_blockers(&self) -> Vec<&Concern> {
        self.outputs
            .iter()
            .flat_map(|o| o.blocking_concerns())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_puts_blocker_first() {
        let mut severities = vec![Severity::Minor, Severity::Blocker, Severity::Major];
        severities.sort();
        assert_eq!(severities[0], Severity::Blocker);
        assert!(Severity::Blocker.is_blocking());
        assert!(!Severity::Critical.is_blocking());
    }

    #[test]
    fn test_severity_from_str_aliases() {
        assert_eq!("BLOCKER".parse::<Severity>().unwrap(), Severity::Blocker);
        assert_eq!("error".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Major);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_agent_output_blocking() {
        let output = AgentOutput::new("security", "reviewer:security", false)
            .with_concern(Concern::new(Severity::Major, "style", "long function"))
            .with_concern(Concern::blocker("security", "SQL injection"));

        assert!(output.has_blocking_concern());
        assert_eq!(output.blocking_concerns().count(), 1);
        assert_eq!(output.highest_severity(), Some(Severity::Blocker));
    }

    #[test]
    fn test_concern_display() {
        let concern = Concern::new(Severity::Critical, "tests", "no coverage");
        assert_eq!(concern.to_string(), "[critical] tests: no coverage");
        let bare = Concern::new(Severity::Minor, "", "typo");
        assert_eq!(bare.to_string(), "[minor] typo");
    }

    #[test]
    fn test_consensus_result_unresolved_blockers() {
        let result = ConsensusResult {
            reached: false,
            iterations: 3,
            outputs: vec![
                AgentOutput::new("a", "reviewer", true),
                AgentOutput::new("b", "reviewer", false).with_concern(Concern::blocker("api", "breaks clients")),
            ],
            requires_human_review: true,
        };
        assert_eq!(result.unresolved_blockers().len(), 1);
    }
}
