//! The LLM collaborator trait and its HTTP implementation, grounded on
//! `analyze/ai_adapter.rs`'s `AiClient`/`OpenAiProvider` split — one trait
//! object the coordinator depends on, swappable for tests without touching
//! call sites.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum LlmError {
    Unavailable(String),
    Timeout,
    MalformedResponse(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Unavailable(msg) => write!(f, "llm unavailable: {msg}"),
            LlmError::Timeout => write!(f, "llm request timed out"),
            LlmError::MalformedResponse(msg) => write!(f, "malformed llm response: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Talks to an Ollama-compatible `/api/generate` endpoint, matching the
/// teacher's reqwest-with-timeout request shape in its OpenAI provider.
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
}

impl HttpLlmClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f64,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            temperature,
            max_tokens,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        }));

        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Unavailable(e.to_string())
                }
            })?;

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        Ok(body.response)
    }
}
