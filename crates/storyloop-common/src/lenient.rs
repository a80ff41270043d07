//! Lenient numeric deserialization for hand-edited story files.
//!
//! Story files are edited by people and by agents, so counters such as
//! `retry_count` sometimes arrive as strings (`"2"`), floats, or junk. These
//! helpers accept all of them: numeric text is parsed, anything else reads
//! as zero (or `None` for optional fields).

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Int(i64),
    Float(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

impl RawCount {
    fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Self::Float(_) => None,
            Self::Text(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            }
            Self::Other(_) => None,
        }
    }
}

/// Deserialize a counter, treating non-numeric values as 0.
pub fn count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawCount>::deserialize(deserializer)?;
    Ok(raw.and_then(|r| r.to_i64()).unwrap_or(0))
}

/// Deserialize an optional counter, treating non-numeric values as absent.
pub fn optional_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawCount>::deserialize(deserializer)?;
    Ok(raw.and_then(|r| r.to_i64()))
}

/// Clamp a possibly negative or oversized counter into `[0, max]`.
pub fn clamp_count(value: i64, max: u32) -> u32 {
    value.clamp(0, i64::from(max)) as u32
}
