//! Layered parsing of agent output into a structured report.
//!
//! Agents are asked to answer with a JSON object, but LLM output is not
//! reliable. Each layer below is tried in order and returns a typed error
//! when it does not apply:
//!
//! 1. strict: the whole output is the JSON object
//! 2. fenced: a ```` ```json ```` (or plain ```` ``` ````) block holds it
//! 3. braced: the first balanced `{ ... }` span in free text
//! 4. lenient: `key: value` lines (`approved: yes`, `- [blocker] ...`)

use serde::Deserialize;
use storyloop_common::{Concern, Severity};
use thiserror::Error;

/// Structured verdict extracted from agent output.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub approved: bool,
    pub summary: String,
    pub concerns: Vec<Concern>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("agent output is empty")]
    Empty,
    #[error("{layer} layer: invalid JSON: {message}")]
    InvalidJson { layer: &'static str, message: String },
    #[error("no fenced code block found")]
    NoFence,
    #[error("no balanced JSON object found")]
    NoObject,
    #[error("no recognizable verdict lines found")]
    NoVerdict,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    approved: Option<bool>,
    #[serde(default, alias = "decision", alias = "status")]
    verdict: Option<String>,
    #[serde(default, alias = "feedback")]
    summary: Option<String>,
    #[serde(default, alias = "issues", alias = "findings")]
    concerns: Vec<RawConcern>,
}

#[derive(Debug, Deserialize)]
struct RawConcern {
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "issue", alias = "message")]
    description: Option<String>,
}

impl RawReport {
    fn into_report(self) -> AgentReport {
        let concerns: Vec<Concern> = self
            .concerns
            .into_iter()
            .filter_map(|c| {
                let description = c.description?;
                let severity = c
                    .severity
                    .as_deref()
                    .and_then(|s| s.parse::<Severity>().ok())
                    .unwrap_or_default();
                Some(Concern::new(
                    severity,
                    c.category.unwrap_or_default(),
                    description,
                ))
            })
            .collect();

        let approved = match (self.approved, self.verdict.as_deref()) {
            (Some(a), _) => a,
            (None, Some(v)) => verdict_approves(v),
            (None, None) => !concerns.iter().any(Concern::is_blocking),
        };

        AgentReport {
            approved,
            summary: self.summary.unwrap_or_default(),
            concerns,
        }
    }
}

fn verdict_approves(verdict: &str) -> bool {
    matches!(
        verdict.trim().to_lowercase().replace('-', "_").as_str(),
        "pass" | "approve" | "approved" | "accept" | "lgtm" | "ok" | "success" | "yes"
    )
}

fn decode(layer: &'static str, json: &str) -> Result<AgentReport, ParseError> {
    serde_json::from_str::<RawReport>(json)
        .map(RawReport::into_report)
        .map_err(|e| ParseError::InvalidJson {
            layer,
            message: e.to_string(),
        })
}

pub fn parse_strict(output: &str) -> Result<AgentReport, ParseError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    decode("strict", trimmed)
}

pub fn parse_fenced(output: &str) -> Result<AgentReport, ParseError> {
    let block = extract_fenced(output).ok_or(ParseError::NoFence)?;
    decode("fenced", block)
}

pub fn parse_braced(output: &str) -> Result<AgentReport, ParseError> {
    let object = extract_braced(output).ok_or(ParseError::NoObject)?;
    decode("braced", object)
}

/// Read `key: value` lines when the agent ignored the JSON instructions.
pub fn parse_lenient(output: &str) -> Result<AgentReport, ParseError> {
    let mut approved = None;
    let mut summary = None;
    let mut concerns = Vec::new();

    for raw_line in output.lines() {
        let line = raw_line.trim().trim_start_matches(['-', '*']).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(concern) = parse_concern_line(line) {
            concerns.push(concern);
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        match key.as_str() {
            "approved" => {
                approved = Some(matches!(
                    value.to_lowercase().as_str(),
                    "yes" | "true" | "y" | "1"
                ))
            }
            "verdict" | "decision" | "status" => approved = Some(verdict_approves(value)),
            "summary" | "feedback" => summary = Some(value.to_string()),
            _ => {}
        }
    }

    if approved.is_none() && summary.is_none() && concerns.is_empty() {
        return Err(ParseError::NoVerdict);
    }

    let approved = approved.unwrap_or_else(|| !concerns.iter().any(Concern::is_blocking));
    Ok(AgentReport {
        approved,
        summary: summary.unwrap_or_default(),
        concerns,
    })
}

/// `[severity] category: description` or `[severity] description`.
fn parse_concern_line(line: &str) -> Option<Concern> {
    let rest = line.strip_prefix('[')?;
    let (severity, rest) = rest.split_once(']')?;
    let severity = severity.parse::<Severity>().ok()?;
    let rest = rest.trim();
    let (category, description) = match rest.split_once(':') {
        Some((cat, desc)) if !cat.contains(' ') => (cat.trim(), desc.trim()),
        _ => ("", rest),
    };
    if description.is_empty() {
        return None;
    }
    Some(Concern::new(severity, category, description))
}

/// Try every layer in order; the last layer's error is returned if all fail.
pub fn parse_agent_report(output: &str) -> Result<AgentReport, ParseError> {
    if output.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    parse_strict(output)
        .or_else(|_| parse_fenced(output))
        .or_else(|_| parse_braced(output))
        .or_else(|_| parse_lenient(output))
}

fn extract_fenced(output: &str) -> Option<&str> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```") {
            let block = &after_marker[..end];
            if let Some(json_start) = block.find('{') {
                return Some(block[json_start..].trim());
            }
        }
    }

    None
}

/// First balanced `{ ... }` span, skipping braces inside JSON strings.
fn extract_braced(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in output[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&output[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
