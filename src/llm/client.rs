//! LLM client for the reasoning engine.
//!
//! The agent talks to any OpenAI-compatible chat-completions endpoint. LLM
//! access is always optional: every caller falls back to deterministic rules
//! when no client is configured or a request fails.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::AgentError;

/// One message of a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// A completed chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
}

/// Trait for chat backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse, AgentError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Client for OpenAI-compatible chat endpoints.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpLlmClient {
    pub fn builder() -> HttpLlmClientBuilder {
        HttpLlmClientBuilder::default()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse, AgentError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(model = %self.model, "sending chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("backend returned {status}: {detail}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("invalid response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::Llm("response carried no content".to_string()))?;

        Ok(ChatResponse {
            content,
            usage: parsed.usage,
        })
    }
}

/// Builder for [`HttpLlmClient`].
#[derive(Debug, Default)]
pub struct HttpLlmClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout: Option<Duration>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl HttpLlmClientBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn build(self) -> Result<Arc<dyn LlmClient>, AgentError> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| AgentError::Configuration("LLM API key not provided".to_string()))?;

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| AgentError::Configuration(format!("invalid API key: {e}")))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(self.timeout.unwrap_or(Duration::from_secs(60)))
            .build()
            .map_err(|e| AgentError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Arc::new(HttpLlmClient {
            client,
            base_url: self
                .base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: self.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            max_tokens: self.max_tokens.unwrap_or(2048),
            temperature: self.temperature.unwrap_or(0.2),
        }))
    }
}
