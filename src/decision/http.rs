//! HTTP decision backend.
//!
//! Talks to an OpenAI-compatible chat completions endpoint. The model
//! is instructed to answer with a single JSON object so the reply can
//! be parsed without scraping prose.

use std::time::Duration;

use crate::config::HttpDecisionConfig;

use super::{DecisionError, DecisionFunction, DecisionOutcome, DecisionRequest, DecisionResult};

const SYSTEM_PROMPT: &str = "You select exactly one candidate from a list. \
Respond with a JSON object of the form \
{\"chosen_index\": <zero-based index>, \"reason\": \"<one sentence>\"} \
and nothing else.";

/// Decision function backed by a remote chat completions API.
pub struct HttpDecisionClient {
    config: HttpDecisionConfig,
    client: reqwest::blocking::Client,
    api_key: String,
    timeout: Duration,
}

impl HttpDecisionClient {
    /// Build a client, reading the API key from the environment
    /// variable named in the config.
    pub fn new(config: HttpDecisionConfig, timeout: Duration) -> DecisionResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| DecisionError::Unavailable(format!("{} is not set", config.api_key_env)))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DecisionError::Api(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            api_key,
            timeout,
        })
    }

    fn user_prompt(&self, request: &DecisionRequest) -> DecisionResult<String> {
        let candidates = serde_json::to_string_pretty(&request.candidates)
            .map_err(|e| DecisionError::Api(format!("failed to serialize candidates: {}", e)))?;
        Ok(format!(
            "Current conditions: {}\n\nOptimize for: {}\n\nCandidates:\n{}",
            request.conditions, request.optimize_for, candidates
        ))
    }
}

impl DecisionFunction for HttpDecisionClient {
    fn decide(&self, request: &DecisionRequest) -> DecisionResult<DecisionOutcome> {
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": self.user_prompt(request)?},
            ],
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DecisionError::Timeout(self.timeout)
                } else {
                    DecisionError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(DecisionError::Api(format!("HTTP {}: {}", status, detail)));
        }

        let payload: serde_json::Value = response
            .json()
            .map_err(|e| DecisionError::InvalidResponse(format!("malformed reply: {}", e)))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                DecisionError::InvalidResponse("reply has no choices[0].message.content".to_string())
            })?;
        serde_json::from_str(content)
            .map_err(|e| DecisionError::InvalidResponse(format!("malformed selection: {}", e)))
    }
}
