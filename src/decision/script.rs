//! Offline decision functions.
//!
//! `ScriptedDecision` replays a queue of planned outcomes, which makes
//! delegation paths testable without a backend. `UnavailableDecision`
//! refuses every call, which is what an engine without credentials
//! runs with; fallback policies then carry every selection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{DecisionError, DecisionFunction, DecisionOutcome, DecisionRequest, DecisionResult};

/// Replays queued outcomes in order. Clones share the queue and the
/// call counter, so a test can keep a handle for inspection.
#[derive(Clone, Default)]
pub struct ScriptedDecision {
    script: Arc<Mutex<VecDeque<DecisionResult<DecisionOutcome>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDecision {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful selection.
    pub fn push_choice(self, chosen_index: usize, reason: &str) -> Self {
        self.push(Ok(DecisionOutcome {
            chosen_index,
            reason: reason.to_string(),
        }))
    }

    /// Queue a failure.
    pub fn push_failure(self, error: DecisionError) -> Self {
        self.push(Err(error))
    }

    pub fn push(self, result: DecisionResult<DecisionOutcome>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
        self
    }

    /// Number of `decide` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DecisionFunction for ScriptedDecision {
    fn decide(&self, _request: &DecisionRequest) -> DecisionResult<DecisionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self
            .script
            .lock()
            .map_err(|_| DecisionError::Unavailable("decision script lock poisoned".to_string()))?;
        script
            .pop_front()
            .unwrap_or_else(|| Err(DecisionError::Unavailable("decision script exhausted".to_string())))
    }
}

/// Always refuses. The engine's fallback policy decides instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDecision;

impl DecisionFunction for UnavailableDecision {
    fn decide(&self, _request: &DecisionRequest) -> DecisionResult<DecisionOutcome> {
        Err(DecisionError::Unavailable(
            "no decision backend configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DecisionRequest {
        DecisionRequest {
            conditions: "normal operations".to_string(),
            optimize_for: "anything".to_string(),
            candidates: vec![serde_json::json!({"id": 1})],
        }
    }

    #[test]
    fn test_script_replays_in_order() {
        let script = ScriptedDecision::new()
            .push_choice(0, "first")
            .push_failure(DecisionError::Api("HTTP 500".into()));

        let first = script.decide(&request()).unwrap();
        assert_eq!(first.chosen_index, 0);
        let second = script.decide(&request()).unwrap_err();
        assert_eq!(second, DecisionError::Api("HTTP 500".into()));
        assert_eq!(script.calls(), 2);
    }

    #[test]
    fn test_exhausted_script_is_unavailable() {
        let script = ScriptedDecision::new();
        let err = script.decide(&request()).unwrap_err();
        assert!(matches!(err, DecisionError::Unavailable(_)));
    }

    #[test]
    fn test_clones_share_state() {
        let script = ScriptedDecision::new().push_choice(0, "x");
        let handle = script.clone();
        script.decide(&request()).unwrap();
        assert_eq!(handle.calls(), 1);
    }
}
