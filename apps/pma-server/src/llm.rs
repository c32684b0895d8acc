use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

/// Failure modes of a single completion call. Handlers never surface these;
/// every caller maps them onto its documented fallback payload.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion backend not configured")]
    Unconfigured,
    #[error("completion request failed: {0}")]
    Network(String),
    #[error("completion backend returned status {0}")]
    Status(u16),
    #[error("completion response malformed: {0}")]
    Malformed(String),
}

#[derive(Clone)]
struct CompletionConfig {
    api_url: String,
    key: String,
    model: String,
}

/// Thin adapter over an OpenAI-compatible `/v1/chat/completions` endpoint.
/// One attempt per call; no retries, no backoff. An absent API key leaves the
/// client unconfigured and every call fails fast with `LlmError::Unconfigured`.
#[derive(Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    config: Option<CompletionConfig>,
}

impl CompletionClient {
    /// Build from `PMA_LLM_BASE_URL` / `PMA_LLM_API_KEY` / `PMA_LLM_MODEL`.
    /// Request timeout comes from `PMA_HTTP_TIMEOUT_SECS` (default 20).
    pub fn from_env() -> Self {
        let key = crate::util::env_nonempty("PMA_LLM_API_KEY");
        let config = key.map(|key| {
            let base = crate::util::env_nonempty("PMA_LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".into());
            let base = base.trim_end_matches('/');
            CompletionConfig {
                api_url: format!("{}/v1/chat/completions", base),
                key,
                model: crate::util::env_nonempty("PMA_LLM_MODEL")
                    .unwrap_or_else(|| "gpt-4o-mini".into()),
            }
        });
        let timeout = crate::util::env_u64("PMA_HTTP_TIMEOUT_SECS", 20);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .expect("build completion http client");
        Self { client, config }
    }

    pub fn unconfigured() -> Self {
        Self {
            client: reqwest::Client::new(),
            config: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// One completion round trip; returns the assistant message text.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let cfg = self.config.as_ref().ok_or(LlmError::Unconfigured)?;
        let body = json!({
            "model": cfg.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });
        let resp = self
            .client
            .post(&cfg.api_url)
            .bearer_auth(&cfg.key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }
        let value: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let text = value
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| {
                choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
            })
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".into()))?;
        if text.trim().is_empty() {
            return Err(LlmError::Malformed("empty completion".into()));
        }
        Ok(text)
    }

    /// Completion that must come back as JSON: strips markdown code fences the
    /// way models habitually wrap structured output, then parses the remainder.
    pub async fn complete_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, LlmError> {
        let raw = self.complete(prompt).await?;
        let cleaned = strip_code_fences(&raw);
        serde_json::from_str(&cleaned).map_err(|e| LlmError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
impl CompletionClient {
    /// Configured client pointed at a stub server; no env involved.
    pub(crate) fn with_base_url(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Some(CompletionConfig {
                api_url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
                key: "test-key".into(),
                model: "test-model".into(),
            }),
        }
    }
}

pub(crate) fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Escape a user-sourced value as a JSON string literal before prompt
/// interpolation. Narrows the injection surface; templates interpolate the
/// quoted form directly.
pub(crate) fn quote(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}
