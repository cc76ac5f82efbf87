//! Deterministic fallback policies for delegated selection.
//!
//! Every delegated rule must declare one. Policies are written in a
//! compact spec form: `first`, `min:<field>` or `max:<field>`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid fallback spec {0:?}; expected first, min:<field> or max:<field>")]
pub struct ParseFallbackError(pub String);

/// How to pick a candidate when delegation cannot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Lowest-id candidate.
    First,
    /// Candidate with the smallest value of the named field.
    Min(String),
    /// Candidate with the largest value of the named field.
    Max(String),
}

impl FallbackPolicy {
    /// The candidate field the policy orders by, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            FallbackPolicy::First => None,
            FallbackPolicy::Min(field) | FallbackPolicy::Max(field) => Some(field),
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = ParseFallbackError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        if spec == "first" {
            return Ok(FallbackPolicy::First);
        }
        if let Some(field) = spec.strip_prefix("min:") {
            if !field.is_empty() {
                return Ok(FallbackPolicy::Min(field.to_string()));
            }
        }
        if let Some(field) = spec.strip_prefix("max:") {
            if !field.is_empty() {
                return Ok(FallbackPolicy::Max(field.to_string()));
            }
        }
        Err(ParseFallbackError(spec.to_string()))
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPolicy::First => f.write_str("first"),
            FallbackPolicy::Min(field) => write!(f, "min:{}", field),
            FallbackPolicy::Max(field) => write!(f, "max:{}", field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips() {
        for spec in ["first", "min:unit_cost", "max:reliability"] {
            let policy: FallbackPolicy = spec.parse().unwrap();
            assert_eq!(policy.to_string(), spec);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_specs() {
        assert!("".parse::<FallbackPolicy>().is_err());
        assert!("min:".parse::<FallbackPolicy>().is_err());
        assert!("cheapest".parse::<FallbackPolicy>().is_err());
    }
}
