//! Closed set of agent roles.

use std::fmt;

use crate::phase::Phase;

/// Focus of a reviewer agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    General,
    Security,
    Performance,
    Architecture,
    Simplicity,
    Testing,
}

impl Perspective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Architecture => "architecture",
            Self::Simplicity => "simplicity",
            Self::Testing => "testing",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "general" | "code" => Some(Self::General),
            "security" => Some(Self::Security),
            "performance" | "perf" => Some(Self::Performance),
            "architecture" | "design" => Some(Self::Architecture),
            "simplicity" => Some(Self::Simplicity),
            "testing" | "tests" | "qa" => Some(Self::Testing),
            _ => None,
        }
    }

    /// What a reviewer with this perspective looks for.
    pub fn focus_areas(&self) -> &'static [&'static str] {
        match self {
            Self::General => &[
                "Correctness against the acceptance criteria",
                "Error handling and edge cases",
                "Readability and consistency with the codebase",
            ],
            Self::Security => &[
                "Injection (SQL, command, path traversal)",
                "Authentication and authorization checks",
                "Secrets or credentials in code or logs",
                "Unsafe deserialization of untrusted input",
            ],
            Self::Performance => &[
                "Accidental quadratic work or N+1 queries",
                "Unbounded memory growth",
                "Blocking calls on hot or async paths",
            ],
            Self::Architecture => &[
                "Module boundaries and coupling",
                "Consistency with existing abstractions",
                "Public API shape",
            ],
            Self::Simplicity => &[
                "Unnecessary abstraction or indirection",
                "Dead code and speculative generality",
            ],
            Self::Testing => &[
                "Coverage of acceptance criteria by tests",
                "Missing edge-case and failure-path tests",
                "Flaky or order-dependent tests",
            ],
        }
    }
}

/// The kind of work an agent does.
///
/// Role strings from configuration are parsed into this enum; anything that
/// isn't recognised becomes [`AgentRole::Unsupported`] and is rejected when
/// the phase runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Refiner,
    Researcher,
    Planner,
    PlanReviewer,
    Implementer,
    Reviewer(Perspective),
    Unsupported(String),
}

impl AgentRole {
    /// Parse a role tag such as `planner` or `reviewer:security`.
    pub fn parse(tag: &str) -> Self {
        let normalized = tag.trim().to_lowercase().replace('-', "_");
        let (base, qualifier) = match normalized.split_once(':') {
            Some((base, q)) => (base.to_string(), q.trim().to_string()),
            None => (normalized.clone(), String::new()),
        };

        match base.as_str() {
            "refiner" | "refine" => Self::Refiner,
            "researcher" | "research" => Self::Researcher,
            "planner" | "plan" => Self::Planner,
            "plan_reviewer" | "plan_review" => Self::PlanReviewer,
            "implementer" | "implement" | "developer" => Self::Implementer,
            "reviewer" | "review" => match Perspective::parse(&qualifier) {
                Some(p) => Self::Reviewer(p),
                None => Self::Unsupported(tag.trim().to_string()),
            },
            _ => Self::Unsupported(tag.trim().to_string()),
        }
    }

    /// Default role for a phase with no configured agent groups.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Refine => Self::Refiner,
            Phase::Research => Self::Researcher,
            Phase::Plan => Self::Planner,
            Phase::PlanReview => Self::PlanReviewer,
            Phase::Implement => Self::Implementer,
            Phase::Review => Self::Reviewer(Perspective::General),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// Whether this role produces a verdict on someone else's work.
    pub fn is_reviewer(&self) -> bool {
        matches!(self, Self::Reviewer(_) | Self::PlanReviewer)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refiner => f.write_str("refiner"),
            Self::Researcher => f.write_str("researcher"),
            Self::Planner => f.write_str("planner"),
            Self::PlanReviewer => f.write_str("plan_reviewer"),
            Self::Implementer => f.write_str("implementer"),
            Self::Reviewer(p) => write!(f, "reviewer:{}", p.as_str()),
            Self::Unsupported(tag) => write!(f, "unsupported:{}", tag),
        }
    }
}
