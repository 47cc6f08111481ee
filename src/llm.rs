//! LLM completion gateway.
//!
//! Personas talk to one `CompletionService` seam: messages in, raw text out.
//! Responses are free-form text expected to contain JSON; extraction and
//! validation happen downstream at an explicit parse-then-validate boundary,
//! so a malformed response is a typed error, never a crash.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::errors::CompletionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<String, CompletionError>;
}

/// HTTP client for an OpenAI-style chat-completions gateway.
pub struct HttpGateway {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl HttpGateway {
    /// Build a gateway from config, with `STORYFORGE_GATEWAY_URL` and
    /// `STORYFORGE_API_KEY` environment overrides.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, CompletionError> {
        let url = std::env::var("STORYFORGE_GATEWAY_URL")
            .unwrap_or_else(|_| config.gateway_url.clone());
        let api_key = std::env::var("STORYFORGE_API_KEY").ok();
        Self::new(&url, api_key, config.llm_timeout)
    }

    pub fn new(
        url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key,
            timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionService for HttpGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<String, CompletionError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&CompletionRequest { model, messages });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout {
                    seconds: self.timeout_secs,
                }
            } else {
                CompletionError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
            });
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CompletionError::Malformed("empty choices".to_string()))
    }
}

/// Slice out the JSON object from a free-form completion. Models wrap JSON
/// in prose or markdown fences; the first `{` to the last `}` is the payload.
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
