//! OpenAI-compatible chat completions client
//!
//! Both supported providers expose `/chat/completions` with bearer auth,
//! so one client covers them; the provider only changes URL, model and key.

use crate::config::ProviderEndpoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider returned no completion text")]
    Empty,
}

/// Single-prompt text completion.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: ProviderEndpoint,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(
        endpoint: ProviderEndpoint,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            temperature,
            max_tokens,
        })
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Completion for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.endpoint.url);
        let body = ChatRequest {
            model: &self.endpoint.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            provider = %self.endpoint.provider,
            model = %self.endpoint.model,
            prompt_chars = prompt.len(),
            "Sending completion request"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::Empty)
    }
}

/// Pull code out of fenced blocks in a model response.
///
/// Every line between fence markers is kept (several blocks are joined);
/// a response without fences is returned trimmed as-is.
pub fn extract_code(response: &str) -> String {
    let mut in_block = false;
    let mut code = Vec::new();

    for line in response.lines() {
        if line.trim_start().starts_with("```") {
            in_block = !in_block;
            continue;
        }
        if in_block {
            code.push(line);
        }
    }

    if code.is_empty() {
        response.trim().to_string()
    } else {
        code.join("\n")
    }
}
