//! LLM provider backends.
//!
//! Every backend implements [`ChatBackend`]: one non-streaming multimodal
//! chat request in, the first candidate's text out. Two backends speak the
//! provider wire formats directly ([`openai`], [`gemini`]); [`routed`] hands
//! any other provider name to `edgequake-llm`.
//!
//! ## Why no global client?
//!
//! Backends are built from an explicit [`PipelineConfig`] (API keys, base
//! URLs, timeout) and shared through [`ProviderSet`] by `Arc`. Nothing reads
//! credentials from process state after startup, and tests can point a
//! backend at a mock server by changing its base URL.

pub mod gemini;
pub mod openai;
pub mod routed;

use crate::config::{PipelineConfig, ProviderKind};
use crate::error::{PipelineError, ProviderCallError};
use crate::pipeline::encode::ImagePayload;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use routed::RoutedBackend;

/// One multimodal chat request: optional system message, then one user
/// message made of `text` followed by `images` in order.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub text: String,
    pub images: Vec<ImagePayload>,
    /// Overrides the backend's default model for this request.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// A text-only user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A provider that can answer a [`ChatRequest`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Model used when the request does not override it.
    fn model(&self) -> &str;

    /// Send the request and return the first candidate's text.
    ///
    /// An empty string is a valid answer; a missing candidate is
    /// [`ProviderCallError::MalformedResponse`].
    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderCallError>;
}

// ── ProviderSet ──────────────────────────────────────────────────────────

/// The backends available to a run, keyed by provider.
///
/// Providers that could not be built (missing API key, unknown name) are
/// remembered with a hint so a call to them fails with
/// [`ProviderCallError::NotConfigured`] instead of at startup.
#[derive(Clone, Default)]
pub struct ProviderSet {
    backends: HashMap<ProviderKind, Arc<dyn ChatBackend>>,
    unavailable: HashMap<ProviderKind, String>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .backends
            .iter()
            .map(|(k, b)| format!("{}:{}", k, b.model()))
            .collect();
        names.sort();
        f.debug_struct("ProviderSet")
            .field("backends", &names)
            .field("unavailable", &self.unavailable.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build backends for the extraction and reconciliation providers.
    ///
    /// Only fails if an HTTP client cannot be constructed.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let mut set = Self::new();

        let wanted = [
            (&config.provider, config.extraction_model()),
            (&config.reconciliation_provider, config.reconciliation_model()),
        ];

        for (kind, model) in wanted {
            if set.backends.contains_key(kind) || set.unavailable.contains_key(kind) {
                continue;
            }
            match build_backend(kind, model, config)? {
                Ok(backend) => {
                    debug!("Provider ready: {} ({})", kind, backend.model());
                    set.backends.insert(kind.clone(), backend);
                }
                Err(hint) => {
                    debug!("Provider unavailable: {} ({})", kind, hint);
                    set.unavailable.insert(kind.clone(), hint);
                }
            }
        }

        Ok(set)
    }

    /// Register (or replace) a backend.
    pub fn with(mut self, kind: ProviderKind, backend: Arc<dyn ChatBackend>) -> Self {
        self.unavailable.remove(&kind);
        self.backends.insert(kind, backend);
        self
    }

    /// Look up the backend for `kind`.
    pub fn get(&self, kind: &ProviderKind) -> Result<Arc<dyn ChatBackend>, ProviderCallError> {
        if let Some(b) = self.backends.get(kind) {
            return Ok(Arc::clone(b));
        }
        let hint = self
            .unavailable
            .get(kind)
            .cloned()
            .unwrap_or_else(|| "No backend was registered for this provider.".to_string());
        Err(ProviderCallError::NotConfigured {
            provider: kind.name().to_string(),
            hint,
        })
    }

    pub fn contains(&self, kind: &ProviderKind) -> bool {
        self.backends.contains_key(kind)
    }
}

/// Outer `Err` is fatal; inner `Err` is a "not configured" hint.
fn build_backend(
    kind: &ProviderKind,
    model: Option<&str>,
    config: &PipelineConfig,
) -> Result<Result<Arc<dyn ChatBackend>, String>, PipelineError> {
    let timeout = config.request_timeout_secs.map(Duration::from_secs);

    let backend: Arc<dyn ChatBackend> = match kind {
        ProviderKind::OpenAi => match &config.credentials.openai_api_key {
            Some(key) => Arc::new(
                OpenAiBackend::new(key.clone(), model.unwrap_or("gpt-4o"), timeout)?
                    .with_base_url(&config.openai_base_url),
            ),
            None => return Ok(Err("Set OPENAI_API_KEY.".to_string())),
        },
        ProviderKind::Gemini => match &config.credentials.google_api_key {
            Some(key) => Arc::new(
                GeminiBackend::new(key.clone(), model.unwrap_or("gemini-1.5-flash"), timeout)?
                    .with_base_url(&config.gemini_base_url),
            ),
            None => return Ok(Err("Set GOOGLE_API_KEY or GEMINI_API_KEY.".to_string())),
        },
        ProviderKind::Other(name) => {
            let Some(model) = model else {
                return Ok(Err(format!(
                    "Provider '{name}' has no default model; pass --model."
                )));
            };
            match RoutedBackend::create(name, model) {
                Ok(b) => Arc::new(b),
                Err(e) => return Ok(Err(e.to_string())),
            }
        }
    };

    Ok(Ok(backend))
}

// ── HTTP helpers shared by the wire backends ─────────────────────────────

/// Build a reqwest client with an optional overall request timeout.
pub(crate) fn http_client(
    provider: &str,
    timeout: Option<Duration>,
) -> Result<reqwest::Client, PipelineError> {
    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder.build().map_err(|e| PipelineError::ProviderInit {
        provider: provider.to_string(),
        detail: e.to_string(),
    })
}

/// Map a transport-level reqwest error.
pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> ProviderCallError {
    if e.is_timeout() {
        ProviderCallError::Timeout {
            provider: provider.to_string(),
        }
    } else if e.is_decode() {
        ProviderCallError::MalformedResponse {
            provider: provider.to_string(),
            detail: e.to_string(),
        }
    } else {
        ProviderCallError::Transport {
            provider: provider.to_string(),
            detail: e.to_string(),
        }
    }
}

/// Map a non-success HTTP response. Consumes the body for the message.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> ProviderCallError {
    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    classify_status(provider, status.as_u16(), retry_after_secs, &body)
}

/// 401/403 → `Auth`, 429 → `RateLimited`, anything else → `Api`.
pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ProviderCallError {
    let message = api_error_message(body);
    match status {
        401 | 403 => ProviderCallError::Auth {
            provider: provider.to_string(),
            detail: message,
        },
        429 => ProviderCallError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        },
        _ => ProviderCallError::Api {
            provider: provider.to_string(),
            status,
            message,
        },
    }
}

/// Both OpenAI and Gemini wrap errors as `{"error": {"message": ...}}`.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.len() > 300 {
                let cut = (0..=300).rev().find(|&i| trimmed.is_char_boundary(i)).unwrap_or(0);
                format!("{}…", &trimmed[..cut])
            } else {
                trimmed.to_string()
            }
        })
}
