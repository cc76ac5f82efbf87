//! Engine and delegation configuration.
//!
//! Configured at engine construction, immutable afterwards. Every
//! limit here bounds work done inside a transaction, so changing one
//! mid-flight would make replays diverge.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for transaction evaluation and delegated selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single delegated call, in seconds.
    pub decision_timeout_secs: u64,

    /// Extra attempts after a transient delegation failure.
    ///
    /// The total number of calls per delegated firing is
    /// `1 + decision_retries`; only then does the fallback policy run.
    pub decision_retries: u32,

    /// Maximum serialized request size handed to a decision function,
    /// in bytes. Candidate lists are truncated to fit.
    pub max_request_len: usize,

    /// Maximum stored length of a decision rationale, in characters.
    pub max_reason_len: usize,

    /// Free-text state of the world included in every delegation
    /// request. `None` means "normal operations".
    pub world_conditions: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_timeout_secs: 10,
            decision_retries: 1,
            max_request_len: 8 * 1024,
            max_reason_len: 2048,
            world_conditions: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Absent fields keep their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    /// Conditions string sent with delegation requests.
    pub fn conditions(&self) -> &str {
        self.world_conditions.as_deref().unwrap_or("normal operations")
    }
}

/// Connection settings for the HTTP decision backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpDecisionConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Environment variable holding the API key. The key itself is
    /// never stored in configuration.
    pub api_key_env: String,

    /// Sampling temperature. Zero keeps selections as repeatable as
    /// the backend allows.
    pub temperature: f64,
}

impl Default for HttpDecisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "RULECAST_DECISION_API_KEY".to_string(),
            temperature: 0.0,
        }
    }
}
