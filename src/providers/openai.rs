//! OpenAI chat-completions backend.
//!
//! `POST {base}/chat/completions` with bearer auth. Images travel as
//! `image_url` content parts carrying the full data URI; the answer is
//! `choices[0].message.content`.

use super::{http_client, status_error, transport_error, ChatBackend, ChatRequest};
use crate::config::OPENAI_BASE_URL;
use crate::error::{PipelineError, ProviderCallError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "openai";

/// Talks to any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn build_messages(request: &ChatRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);

    if let Some(system) = &request.system {
        messages.push(Message {
            role: "system",
            content: MessageContent::Text(system.clone()),
        });
    }

    let content = if request.images.is_empty() {
        MessageContent::Text(request.text.clone())
    } else {
        let mut parts = Vec::with_capacity(request.images.len() + 1);
        parts.push(ContentPart::Text {
            text: request.text.clone(),
        });
        parts.extend(request.images.iter().map(|img| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: img.encoding.clone(),
            },
        }));
        MessageContent::Parts(parts)
    };

    messages.push(Message {
        role: "user",
        content,
    });
    messages
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderCallError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = CompletionBody {
            model,
            messages: build_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model {}, {} images)", url, model, request.images.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(status_error(PROVIDER, response).await);
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderCallError::MalformedResponse {
                provider: PROVIDER.to_string(),
                detail: e.to_string(),
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderCallError::MalformedResponse {
                provider: PROVIDER.to_string(),
                detail: "response has no choices".into(),
            })?;

        Ok(choice.message.content.unwrap_or_default())
    }
}
