use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AiConfig;
use crate::store::{ROLE_ASSISTANT, ROLE_USER};

#[derive(Error, Debug)]
pub enum AiError {
    /// Credential or configuration problem. Callers degrade gracefully;
    /// retrying cannot help.
    #[error("AI provider unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Parse(String),
}

impl AiError {
    fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) => true,
            AiError::Timeout(_) => true,
            AiError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Client for the Gemini generateContent API. The external service is
/// treated as untrusted and slow: every request carries a timeout, and
/// transient failures are retried a bounded number of times.
pub struct AiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout_seconds: u64,
    max_retries: u32,
}

impl AiClient {
    /// A missing credential is not fatal: the client is constructed in
    /// unavailable mode and every call reports `AiError::Unavailable`.
    pub fn new(config: &AiConfig) -> Result<Self> {
        if config.gemini_api_key.is_none() {
            warn!("GEMINI_API_KEY is not configured; assistant replies will degrade");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client for AI provider")?;

        Ok(Self {
            client,
            api_key: config.gemini_api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout_seconds: config.timeout_seconds,
            max_retries: config.max_retries,
        })
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// One advisor completion: system context, prior turns, and the current
    /// user message.
    pub async fn generate(
        &self,
        system: &str,
        history: &[(String, String)],
        message: &str,
    ) -> Result<String, AiError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AiError::Unavailable("GEMINI_API_KEY is not set".to_string()))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );
        let body = build_request_body(system, history, message);

        info!(
            model = %self.model,
            history_turns = history.len(),
            "Requesting assistant completion"
        );

        let mut last_error = None;
        let total_attempts = self.max_retries + 1;
        for attempt in 1..=total_attempts {
            match self.attempt(&url, &body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < total_attempts => {
                    let backoff = Duration::from_secs(2u64.pow(attempt - 1));
                    warn!(attempt, error = %e, "assistant call failed, retrying in {:?}", backoff);
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| AiError::Parse("assistant retry loop exhausted".to_string())))
    }

    async fn attempt(&self, url: &str, body: &Value) -> Result<String, AiError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response.json().await.map_err(|e| self.request_error(e))?;
        extract_reply(&payload)
            .ok_or_else(|| AiError::Parse("no candidate text in response".to_string()))
    }

    fn request_error(&self, e: reqwest::Error) -> AiError {
        if e.is_timeout() {
            AiError::Timeout(self.timeout_seconds)
        } else {
            AiError::Network(e)
        }
    }
}

/// Gemini has no dedicated system role; the system context rides as the
/// first user turn, followed by the stored history and the new message.
fn build_request_body(system: &str, history: &[(String, String)], message: &str) -> Value {
    let mut contents = vec![json!({"role": "user", "parts": [{"text": system}]})];

    for (role, text) in history {
        let gemini_role = if role == ROLE_ASSISTANT { "model" } else { ROLE_USER };
        contents.push(json!({"role": gemini_role, "parts": [{"text": text}]}));
    }

    contents.push(json!({"role": "user", "parts": [{"text": message}]}));
    json!({ "contents": contents })
}

fn extract_reply(payload: &Value) -> Option<String> {
    let text = payload["candidates"][0]["content"]["parts"][0]["text"].as_str()?;
    Some(text.trim().to_string())
}
