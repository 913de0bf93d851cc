//! Minimal client for the Anthropic Messages API.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ANTHROPIC_API: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Single-turn completion client.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl LlmClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: ANTHROPIC_API.into(),
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send one user turn and return the concatenated text reply.
    pub async fn complete(
        &self,
        system: Option<&str>,
        prompt: &str,
        temperature: f32,
    ) -> Result<String, Error> {
        let api_key = self.api_key.as_deref().ok_or(Error::MissingApiKey)?;
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature,
            system,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
        };
        tracing::debug!(model = %self.model, temperature, "calling messages API");
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                service: "Anthropic",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body: MessagesResponse = response.json().await?;
        let text: String = body
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(Error::EmptyReply);
        }
        Ok(text)
    }
}
