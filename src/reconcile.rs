//! Reconciliation: merge extracted JSON fragments under an instruction prompt,
//! then ask the model to verify the merged JSON.
//!
//! Two text-only requests go to the reconciliation provider:
//!
//! 1. **Combination**: `"{prompt} {fragment}, {fragment}, …"` as a single
//!    user message. Its answer is the *first-pass* text.
//! 2. **Verification**: the first-pass text wrapped in a prompt asking the
//!    model to repair JSON syntax, evaluate arithmetic such as `2 + 5`, and
//!    reply with the JSON only. Sent whenever the first request got an
//!    answer, even an empty one.
//!
//! [`VerificationMode`] decides which answer is final. Under the default
//! [`VerificationMode::Discard`] the verification answer is recorded but the
//! first-pass text is returned. No local schema validation is done.

use crate::config::{PipelineConfig, ProviderKind, VerificationMode};
use crate::extract::CallOutcome;
use crate::observer::{or_noop, CallStage, SharedObserver};
use crate::prompts::{combination_message, verification_message, DEFAULT_RECONCILIATION_PROMPT};
use crate::providers::{ChatRequest, ProviderSet};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Input of one reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRequest {
    pub instruction_prompt: String,
    pub fragments: Vec<String>,
}

impl ReconciliationRequest {
    pub fn new(instruction_prompt: impl Into<String>, fragments: Vec<String>) -> Self {
        Self {
            instruction_prompt: instruction_prompt.into(),
            fragments,
        }
    }
}

/// Output of one reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub provider: String,
    pub mode: VerificationMode,
    /// Answer to the combination request.
    pub first_pass: CallOutcome,
    /// Answer to the verification request; `None` when it was not sent.
    pub verification: Option<CallOutcome>,
    /// The text handed back to the caller.
    pub final_text: Option<String>,
    pub duration_ms: u64,
}

impl ReconciliationResult {
    /// The final JSON text, or `None` if the first pass produced nothing.
    pub fn final_json_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }
}

/// Sends reconciliation requests to one provider.
#[derive(Clone)]
pub struct ReconciliationClient {
    providers: ProviderSet,
    provider: ProviderKind,
    model: Option<String>,
    mode: VerificationMode,
    observer: SharedObserver,
}

impl ReconciliationClient {
    pub fn new(providers: ProviderSet, provider: ProviderKind) -> Self {
        Self {
            providers,
            provider,
            model: None,
            mode: VerificationMode::default(),
            observer: or_noop(None),
        }
    }

    /// Client configured from `config` (provider, model, mode, observer).
    ///
    /// The model is always pinned: `reconciliation_model`, else the
    /// provider default, never the extraction model.
    pub fn from_config(providers: ProviderSet, config: &PipelineConfig) -> Self {
        Self {
            providers,
            provider: config.reconciliation_provider.clone(),
            model: config.reconciliation_model().map(str::to_owned),
            mode: config.verification_mode,
            observer: or_noop(config.observer.as_ref()),
        }
    }

    /// Model sent with every request, overriding the backend default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_mode(mut self, mode: VerificationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// The built-in instruction prompt.
    pub fn default_prompt() -> &'static str {
        DEFAULT_RECONCILIATION_PROMPT
    }

    /// Reconcile `fragments` under `instruction_prompt`.
    pub async fn reconcile<S: AsRef<str>>(
        &self,
        instruction_prompt: &str,
        fragments: &[S],
    ) -> ReconciliationResult {
        let request = ReconciliationRequest::new(
            instruction_prompt,
            fragments.iter().map(|f| f.as_ref().to_string()).collect(),
        );
        self.send(&request).await
    }

    /// Reconcile a prepared [`ReconciliationRequest`].
    pub async fn send(&self, request: &ReconciliationRequest) -> ReconciliationResult {
        let start = Instant::now();
        info!(
            "Reconciling {} fragments with {} (verification: {:?})",
            request.fragments.len(),
            self.provider,
            self.mode
        );

        let combined = combination_message(&request.instruction_prompt, &request.fragments);
        let first_pass = self.call(CallStage::Reconciliation, combined).await;

        let verification = match (self.mode, &first_pass) {
            (VerificationMode::Skip, _) => None,
            // A failed request has no answer to verify.
            (_, CallOutcome::Failure(_)) => None,
            (_, CallOutcome::Success(text)) => Some(
                self.call(CallStage::Verification, verification_message(text))
                    .await,
            ),
        };

        let first = first_pass.text();
        let final_text = match (self.mode, verification.as_ref().and_then(|v| v.text())) {
            (VerificationMode::Apply, Some(verified)) => Some(verified.to_string()),
            (VerificationMode::Apply, None) => {
                if first.is_some() {
                    warn!("Verification produced no text; keeping first-pass result");
                }
                first.map(str::to_string)
            }
            _ => first.map(str::to_string),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!("Reconciliation finished in {}ms", duration_ms);

        ReconciliationResult {
            provider: self.provider.name().to_string(),
            mode: self.mode,
            first_pass,
            verification,
            final_text,
            duration_ms,
        }
    }

    async fn call(&self, stage: CallStage, text: String) -> CallOutcome {
        let provider = self.provider.name();
        let backend = match self.providers.get(&self.provider) {
            Ok(b) => b,
            Err(e) => {
                warn!("{} skipped: {}", stage, e);
                self.observer
                    .on_provider_call_error(stage, provider, &e.to_string());
                return CallOutcome::Failure(e);
            }
        };

        self.observer.on_provider_call_start(stage, provider, 0);
        let start = Instant::now();

        let request = ChatRequest {
            model: self.model.clone(),
            ..ChatRequest::user(text)
        };

        match backend.complete(&request).await {
            Ok(answer) => {
                let ms = start.elapsed().as_millis() as u64;
                debug!("{} answer: {} bytes in {}ms", stage, answer.len(), ms);
                self.observer
                    .on_provider_call_complete(stage, provider, answer.len(), ms);
                CallOutcome::Success(answer)
            }
            Err(e) => {
                warn!("{} with {} failed: {}", stage, provider, e);
                self.observer
                    .on_provider_call_error(stage, provider, &e.to_string());
                CallOutcome::Failure(e)
            }
        }
    }
}
