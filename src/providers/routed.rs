//! Routed backend: any vision provider known to `edgequake-llm`.
//!
//! Used for provider names other than `openai` and `gemini` (anthropic,
//! mistral, ollama, azure, …). The factory reads that provider's own API key
//! variable; this crate never sees it.

use super::{ChatBackend, ChatRequest};
use crate::error::ProviderCallError;
use crate::pipeline::encode::ImagePayload;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

pub struct RoutedBackend {
    name: String,
    model: String,
    provider: Arc<dyn LLMProvider>,
}

impl RoutedBackend {
    /// Instantiate `name` with `model` through [`ProviderFactory`].
    pub fn create(name: &str, model: &str) -> Result<Self, ProviderCallError> {
        Ok(Self {
            name: name.to_string(),
            model: model.to_string(),
            provider: instantiate(name, model)?,
        })
    }

    /// Wrap an already-built provider.
    pub fn from_provider(
        name: impl Into<String>,
        model: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            provider,
        }
    }
}

fn instantiate(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProviderCallError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ProviderCallError::NotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn build_messages(request: &ChatRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        messages.push(ChatMessage::system(system));
    }
    let images = request
        .images
        .iter()
        .map(ImagePayload::to_image_data)
        .collect();
    messages.push(ChatMessage::user_with_images(&request.text, images));
    messages
}

#[async_trait]
impl ChatBackend for RoutedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderCallError> {
        // Providers are bound to a model at construction; a different model
        // needs its own instance.
        let provider = match request.model.as_deref() {
            Some(m) if m != self.model => instantiate(&self.name, m)?,
            _ => Arc::clone(&self.provider),
        };

        let options = CompletionOptions {
            temperature: request.temperature,
            max_tokens: request.max_tokens.map(|n| n as usize),
            ..Default::default()
        };

        let messages = build_messages(request);
        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ProviderCallError::Transport {
                provider: self.name.clone(),
                detail: format!("{e}"),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
