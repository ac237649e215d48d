//! Extraction: send a batch of page images to a multimodal model and get JSON
//! text back.
//!
//! This module is intentionally thin. All prompt text lives in
//! [`crate::prompts`] and all wire formats in [`crate::providers`].
//!
//! ## Failure model
//!
//! [`ExtractionClient::extract`] never returns `Err`. A transport or provider
//! failure is logged and recorded as [`CallOutcome::Failure`], so one failed
//! batch does not abort a multi-document run and callers can still tell
//! "the call failed" from "the model answered with nothing". There is no
//! retry and no backoff.

use crate::config::{PipelineConfig, ProviderKind};
use crate::error::ProviderCallError;
use crate::observer::{or_noop, CallStage, SharedObserver};
use crate::pipeline::encode::ImagePayload;
use crate::prompts::{DEFAULT_EXTRACTION_PROMPT, EXTRACTION_PREAMBLE};
use crate::providers::{ChatRequest, ProviderSet};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The provider answered; the text may be empty.
    Success(String),
    /// The call failed; the reason is kept for reporting.
    Failure(ProviderCallError),
}

impl CallOutcome {
    /// Non-empty response text, or `None` for a failure or an empty answer.
    pub fn text(&self) -> Option<&str> {
        match self {
            CallOutcome::Success(t) if !t.trim().is_empty() => Some(t),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failure(_))
    }

    pub fn error(&self) -> Option<&ProviderCallError> {
        match self {
            CallOutcome::Failure(e) => Some(e),
            CallOutcome::Success(_) => None,
        }
    }

    fn text_len(&self) -> usize {
        match self {
            CallOutcome::Success(t) => t.len(),
            CallOutcome::Failure(_) => 0,
        }
    }
}

/// One extraction call's input. Built once and not mutated afterwards.
#[derive(Debug, Clone)]
pub struct ExtractionRequest<'a> {
    pub system_instruction: &'a str,
    pub images: &'a [ImagePayload],
}

/// One extraction call's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub outcome: CallOutcome,
    pub provider: String,
    pub model: Option<String>,
    pub image_count: usize,
    pub duration_ms: u64,
}

impl ExtractionResult {
    /// The extracted text, or `None` if the call failed or returned nothing.
    pub fn raw_text(&self) -> Option<&str> {
        self.outcome.text()
    }
}

/// Sends extraction requests through a [`ProviderSet`].
#[derive(Clone)]
pub struct ExtractionClient {
    providers: ProviderSet,
    preamble: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    observer: SharedObserver,
}

impl ExtractionClient {
    pub fn new(providers: ProviderSet) -> Self {
        Self {
            providers,
            preamble: EXTRACTION_PREAMBLE.to_string(),
            max_tokens: Some(4096),
            temperature: None,
            observer: or_noop(None),
        }
    }

    /// Client configured from `config` (preamble, limits, observer).
    pub fn from_config(providers: ProviderSet, config: &PipelineConfig) -> Self {
        Self {
            providers,
            preamble: config
                .extraction_preamble
                .clone()
                .unwrap_or_else(|| EXTRACTION_PREAMBLE.to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: config.temperature,
            observer: or_noop(config.observer.as_ref()),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// The built-in system instruction.
    pub fn default_instruction() -> &'static str {
        DEFAULT_EXTRACTION_PROMPT
    }

    /// Send `images` with `instruction` to `provider`.
    pub async fn extract(
        &self,
        instruction: &str,
        images: &[ImagePayload],
        provider: &ProviderKind,
    ) -> ExtractionResult {
        self.send(
            ExtractionRequest {
                system_instruction: instruction,
                images,
            },
            provider,
        )
        .await
    }

    /// Send a prepared [`ExtractionRequest`].
    pub async fn send(&self, request: ExtractionRequest<'_>, provider: &ProviderKind) -> ExtractionResult {
        let start = Instant::now();
        let image_count = request.images.len();

        let backend = match self.providers.get(provider) {
            Ok(b) => b,
            Err(e) => {
                warn!("Extraction skipped: {}", e);
                self.observer
                    .on_provider_call_error(CallStage::Extraction, provider.name(), &e.to_string());
                return ExtractionResult {
                    outcome: CallOutcome::Failure(e),
                    provider: provider.name().to_string(),
                    model: None,
                    image_count,
                    duration_ms: 0,
                };
            }
        };

        info!(
            "Sending {} images to {} ({})",
            image_count,
            backend.name(),
            backend.model()
        );
        self.observer
            .on_provider_call_start(CallStage::Extraction, backend.name(), image_count);

        let chat = ChatRequest {
            system: Some(request.system_instruction.to_string()),
            text: self.preamble.clone(),
            images: request.images.to_vec(),
            model: None,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let outcome = match backend.complete(&chat).await {
            Ok(text) => CallOutcome::Success(text),
            Err(e) => {
                warn!("Extraction with {} failed: {}", backend.name(), e);
                CallOutcome::Failure(e)
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            CallOutcome::Success(_) => {
                debug!(
                    "Extraction returned {} bytes in {}ms",
                    outcome.text_len(),
                    duration_ms
                );
                self.observer.on_provider_call_complete(
                    CallStage::Extraction,
                    backend.name(),
                    outcome.text_len(),
                    duration_ms,
                );
            }
            CallOutcome::Failure(e) => {
                self.observer.on_provider_call_error(
                    CallStage::Extraction,
                    backend.name(),
                    &e.to_string(),
                );
            }
        }

        ExtractionResult {
            outcome,
            provider: backend.name().to_string(),
            model: Some(backend.model().to_string()),
            image_count,
            duration_ms,
        }
    }
}
