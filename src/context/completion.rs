//! LLM completion client used for summaries and titles

use super::models::{ConversationItem, Role};
use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Single-shot completion over a list of conversation items
#[async_trait]
pub trait LlmCompletion: Send + Sync {
    /// Run `instructions` as the system prompt over `input` and return the text reply
    async fn run(&self, instructions: &str, input: &[ConversationItem]) -> Result<String, CompletionError>;
}

/// Completion errors
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unknown error")]
    Unknown,
}

/// Completion client for OpenAI-compatible chat endpoints
pub struct OpenAiCompletion {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: usize,
}

impl OpenAiCompletion {
    pub fn new(config: &LlmConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompletionError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone().map(SecretString::new),
            max_retries: config.max_retries.max(1),
        })
    }

    fn build_request(&self, instructions: &str, input: &[ConversationItem]) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(input.len() + 1);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: instructions.to_string(),
        });
        messages.extend(input.iter().map(|item| ChatMessage {
            role: wire_role(item.role()).to_string(),
            content: item.text(),
        }));

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.3),
        }
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        // Tool output without a matching call id is rejected by the API.
        Role::Tool => "user",
        other => other.as_str(),
    }
}

#[async_trait]
impl LlmCompletion for OpenAiCompletion {
    async fn run(&self, instructions: &str, input: &[ConversationItem]) -> Result<String, CompletionError> {
        debug!("Running completion over {} items with {}", input.len(), self.model);

        let request = self.build_request(instructions, input);

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for completion", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            let mut req = self.client.post(&self.endpoint).json(&request);

            if let Some(ref api_key) = self.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
            }

            match req.send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        last_error = Some(CompletionError::ApiError(format!("HTTP {}: {}", status, body)));
                        continue;
                    }

                    match response.json::<ChatCompletionResponse>().await {
                        Ok(resp) => {
                            if let Some(choice) = resp.choices.into_iter().next() {
                                return Ok(choice.message.content.unwrap_or_default());
                            }
                            last_error = Some(CompletionError::ApiError("No choices in response".to_string()));
                        }
                        Err(e) => {
                            last_error = Some(CompletionError::ApiError(format!("Failed to parse response: {}", e)));
                        }
                    }
                }
                Err(e) => {
                    last_error = Some(CompletionError::NetworkError(e.to_string()));
                }
            }
        }

        warn!("Completion failed after {} attempts", self.max_retries);
        Err(last_error.unwrap_or(CompletionError::Unknown))
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
