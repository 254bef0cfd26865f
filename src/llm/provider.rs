// =============================================================================
// LLM provider adapter — OpenAI-compatible chat completions
// =============================================================================
//
// `ai_provider: "openai-compatible"` (config.rs) means every provider we
// talk to — whether it fronts a chat-tier or a reasoning-tier model — speaks
// the same `/chat/completions` shape. The `fast`/`deep` distinction is
// purely which model name and which timeout/retry policy we dial; the wire
// format doesn't change.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::SathError;

/// Which role slot a call is for. Both share a token bucket (spec.md §5) but
/// carry independent model names and, in practice, independent latency
/// budgets — `deep` calls are reasoning-tier and run longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    Fast,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

impl ChatRole {
    fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A provider adapter: `chat(messages, schema_hint) -> text`, with timeout
/// and retry handled by the implementation (spec.md §6).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// `json_hint` requests a JSON-object response format from non-reasoner
    /// models; reasoning-tier models ignore the hint and are expected to
    /// embed JSON inside free-text reasoning (parsed by `llm::parser`).
    async fn chat(&self, role: LlmRole, messages: &[ChatMessage], json_hint: bool) -> Result<String, SathError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// HTTP adapter over an OpenAI-compatible `/v1/chat/completions` endpoint.
/// Retries transport failures with exponential backoff; callers pair this
/// with [`crate::llm::CircuitBreaker`] to stop retrying a dead provider.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model_fast: String,
    model_deep: String,
    max_retries: u32,
}

impl HttpLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model_fast: impl Into<String>,
        model_deep: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model_fast: model_fast.into(),
            model_deep: model_deep.into(),
            max_retries: 3,
        }
    }

    fn model_for(&self, role: LlmRole) -> &str {
        match role {
            LlmRole::Fast => &self.model_fast,
            LlmRole::Deep => &self.model_deep,
        }
    }

    async fn send_once(&self, role: LlmRole, messages: &[ChatMessage], json_hint: bool) -> Result<String> {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        // Reasoning-tier models frequently reject response_format; only the
        // fast/chat-tier role gets the hint (spec.md §4.5.4).
        let response_format = if json_hint && role == LlmRole::Fast {
            Some(ResponseFormat { kind: "json_object" })
        } else {
            None
        };

        let request = ChatCompletionRequest {
            model: self.model_for(role),
            messages: wire_messages,
            response_format,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("llm request failed to send")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("llm provider returned {status}: {body}");
        }

        let parsed: ChatCompletionResponse = resp.json().await.context("llm response was not valid JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("llm response had no choices")?;

        Ok(content)
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    #[instrument(skip(self, messages), fields(role = ?role))]
    async fn chat(&self, role: LlmRole, messages: &[ChatMessage], json_hint: bool) -> Result<String, SathError> {
        let mut attempt = 0;
        loop {
            match self.send_once(role, messages, json_hint).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt + 1 < self.max_retries => {
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "llm transport error, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(SathError::LlmTransport(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_picks_the_right_model_name() {
        let provider = HttpLlmProvider::new("https://api.example.com/v1", "key", "fast-model", "deep-model");
        assert_eq!(provider.model_for(LlmRole::Fast), "fast-model");
        assert_eq!(provider.model_for(LlmRole::Deep), "deep-model");
    }
}
