//! # Decision Delegation
//!
//! Delegated value selection: the engine hands a candidate list and
//! selection criteria to a decision function and gets back a chosen
//! index with a reason. The function behind the seam may be a remote
//! model, a script, or nothing at all; the engine treats them alike
//! and falls back to a deterministic policy when the call fails.

mod http;
mod script;

pub use http::HttpDecisionClient;
pub use script::{ScriptedDecision, UnavailableDecision};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a decision function is asked to choose between.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRequest {
    /// Free-text state of the world.
    pub conditions: String,

    /// Selection criteria, as declared on the rule.
    pub optimize_for: String,

    /// Candidate snapshots, one JSON object per candidate row.
    pub candidates: Vec<serde_json::Value>,
}

impl DecisionRequest {
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}

/// A selection made by a decision function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Zero-based index into the request's candidate list.
    pub chosen_index: usize,

    /// Why this candidate was chosen.
    pub reason: String,
}

/// Ways a delegated call can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    /// No backend is reachable or configured. Retrying cannot help.
    #[error("decision backend unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its deadline.
    #[error("decision request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with an error.
    #[error("decision API error: {0}")]
    Api(String),

    /// The backend answered, but not with a usable selection.
    #[error("invalid decision response: {0}")]
    InvalidResponse(String),
}

impl DecisionError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DecisionError::Unavailable(_))
    }
}

pub type DecisionResult<T> = Result<T, DecisionError>;

/// Decision function seam.
pub trait DecisionFunction: Send + Sync {
    /// Choose one candidate. The returned index must be within the
    /// request's candidate list; the engine treats anything else as
    /// an invalid response.
    fn decide(&self, request: &DecisionRequest) -> DecisionResult<DecisionOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_not_transient() {
        assert!(!DecisionError::Unavailable("no backend".into()).is_transient());
        assert!(DecisionError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(DecisionError::Api("HTTP 500".into()).is_transient());
        assert!(DecisionError::InvalidResponse("not json".into()).is_transient());
    }
}
