//! Language model client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docflow_engine::{FlowError, FlowResult};

use crate::config::HttpTimeouts;
use crate::settings::AiSettings;

const SYSTEM_PROMPT: &str = "You are a helpful assistant designed to output JSON.";

/// Stateless single-turn text completion.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32, top_p: f32) -> FlowResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionClient {
    /// Create a new client bounded by the configured timeouts.
    pub fn new(settings: &AiSettings, timeouts: HttpTimeouts) -> FlowResult<Self> {
        let client = timeouts
            .client_builder()
            .build()
            .map_err(|e| FlowError::Configuration(format!("cannot build model client: {}", e)))?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionClient {
    async fn complete(&self, prompt: &str, temperature: f32, top_p: f32) -> FlowResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            top_p,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FlowError::Transport(format!(
                "completion failed with status {}: {}",
                status, body
            )));
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FlowError::Data("completion returned no choices".to_string()))?;

        tracing::debug!(chars = content.len(), "Language model replied");
        Ok(content)
    }
}

impl std::fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}
