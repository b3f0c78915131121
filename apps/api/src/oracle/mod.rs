//! Oracle Adapter — the single call boundary to the external LLM.
//!
//! ARCHITECTURAL RULE: no other module may call the LLM API directly; every
//! classifier goes through [`OracleAdapter::call_json`].

pub mod classifiers;
pub mod prompts;

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use chrono::Utc;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

/// Error taxonomy surfaced to callers, per the Oracle Adapter's error
/// contract: quota is sticky, rate-limit is transient, everything else
/// (network failure, 5xx, malformed JSON) is `Other`.
#[derive(Debug, Error, Clone)]
pub enum OracleError {
    #[error("oracle quota exhausted")]
    QuotaExhausted,

    #[error("oracle rate limited")]
    RateLimited,

    #[error("oracle error: {0}")]
    Other(String),
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(default)]
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// The Oracle Adapter. Holds the HTTP client, the configured model and
/// optional fallback model, and the directory traces are written to.
#[derive(Clone)]
pub struct OracleAdapter {
    client: Client,
    api_key: String,
    model: String,
    fallback_model: Option<String>,
    traces_dir: PathBuf,
}

impl OracleAdapter {
    pub fn new(
        api_key: String,
        model: String,
        fallback_model: Option<String>,
        timeout_secs: u64,
        data_dir: &std::path::Path,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("failed to build oracle HTTP client"),
            api_key,
            model,
            fallback_model,
            traces_dir: data_dir.join("traces"),
        }
    }

    /// Calls the oracle for a JSON-contract classifier. Retries exactly once
    /// against the fallback model (if configured and distinct from the
    /// primary) on any non-quota error. Every attempt that returns text is
    /// appended to `traces/<session_id>.jsonl`, whether or not it parses.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        session_id: &str,
        op: &str,
        phase: &str,
        system: &str,
        prompt: &str,
    ) -> Result<T, OracleError> {
        let system = prompts::ensure_json_instruction(system, prompt);

        let parse = |text: &str| -> Result<T, OracleError> {
            serde_json::from_str(text).map_err(|e| {
                warn!("oracle response for {op} failed to parse as JSON: {e}");
                OracleError::Other(format!("non-JSON response: {e}"))
            })
        };

        match self.raw_attempt(&self.model, session_id, op, phase, &system, prompt).await {
            Ok(text) => parse(&text),
            Err(OracleError::QuotaExhausted) => Err(OracleError::QuotaExhausted),
            Err(first_err) => match self.fallback_for(&self.model) {
                Some(model) => match self.raw_attempt(model, session_id, op, phase, &system, prompt).await {
                    Ok(text) => parse(&text),
                    Err(e) => Err(e),
                },
                None => Err(first_err),
            },
        }
    }

    /// Calls the oracle for a free-form prose classifier (e.g.
    /// `summarize_transcript`), applying the same retry and trace policy as
    /// [`Self::call_json`] but without a JSON parse step.
    pub async fn call_text(
        &self,
        session_id: &str,
        op: &str,
        phase: &str,
        system: &str,
        prompt: &str,
    ) -> Result<String, OracleError> {
        match self.raw_attempt(&self.model, session_id, op, phase, system, prompt).await {
            Ok(text) => Ok(text),
            Err(OracleError::QuotaExhausted) => Err(OracleError::QuotaExhausted),
            Err(first_err) => match self.fallback_for(&self.model) {
                Some(model) => self.raw_attempt(model, session_id, op, phase, system, prompt).await,
                None => Err(first_err),
            },
        }
    }

    fn fallback_for<'a>(&'a self, current: &str) -> Option<&'a str> {
        self.fallback_model.as_deref().filter(|m| *m != current)
    }

    /// Makes one HTTP call against `model`, classifies any error, and traces
    /// the exchange. Returns the raw (fence-stripped) response text.
    async fn raw_attempt(
        &self,
        model: &str,
        session_id: &str,
        op: &str,
        phase: &str,
        system: &str,
        prompt: &str,
    ) -> Result<String, OracleError> {
        let body = AnthropicRequest {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Other(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| OracleError::Other(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<AnthropicErrorEnvelope>(&raw)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| raw.clone());
            let error_type = serde_json::from_str::<AnthropicErrorEnvelope>(&raw)
                .map(|e| e.error.error_type)
                .unwrap_or_default();

            self.trace(session_id, op, phase, system, prompt, &format!("ERROR {status}: {message}"));

            return Err(classify_http_error(status.as_u16(), &error_type, &message));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&raw)
            .map_err(|e| OracleError::Other(format!("unexpected response shape: {e}")))?;
        let text = parsed.text().ok_or_else(|| OracleError::Other("empty oracle response".into()))?;
        let text = strip_json_fences(text).to_string();

        self.trace(session_id, op, phase, system, prompt, &text);

        Ok(text)
    }

    fn trace(&self, session_id: &str, op: &str, phase: &str, system: &str, prompt: &str, output: &str) {
        let record = json!({
            "ts": Utc::now().to_rfc3339(),
            "session_id": session_id,
            "op": op,
            "phase": phase,
            "messages": { "system": system, "user": prompt },
            "output": output,
        });

        if let Err(e) = self.append_trace(session_id, &record) {
            warn!("failed to write oracle trace for session {session_id}: {e}");
        }
    }

    fn append_trace(&self, session_id: &str, record: &serde_json::Value) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.traces_dir)?;
        let path = self.traces_dir.join(format!("{session_id}.jsonl"));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{record}")
    }
}

fn classify_http_error(status: u16, error_type: &str, message: &str) -> OracleError {
    if status == 429 {
        let hay = format!("{error_type} {message}").to_lowercase();
        if hay.contains("quota") || hay.contains("credit") || hay.contains("billing") {
            OracleError::QuotaExhausted
        } else {
            OracleError::RateLimited
        }
    } else {
        OracleError::Other(format!("status {status}: {message}"))
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped.trim_start().strip_suffix("```").map(|s| s.trim()).unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped.trim_start().strip_suffix("```").map(|s| s.trim()).unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn classify_429_quota_wording_as_quota_exhausted() {
        let err = classify_http_error(429, "rate_limit_error", "You have exceeded your quota");
        assert!(matches!(err, OracleError::QuotaExhausted));
    }

    #[test]
    fn classify_429_without_quota_wording_as_rate_limited() {
        let err = classify_http_error(429, "rate_limit_error", "Too many requests");
        assert!(matches!(err, OracleError::RateLimited));
    }

    #[test]
    fn classify_5xx_as_other() {
        let err = classify_http_error(503, "overloaded_error", "Service unavailable");
        assert!(matches!(err, OracleError::Other(_)));
    }
}
