//! Configuration types for a document-to-JSON pipeline run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. API keys are carried explicitly in
//! [`ApiCredentials`] and handed to each client at construction time; nothing
//! in the library reads provider credentials from ambient global state.

use crate::error::PipelineError;
use crate::observer::PipelineObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default OpenAI chat-completions base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Google Generative Language base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Scale factor applied to each PDF page's natural size before rendering.
pub const DEFAULT_RENDER_SCALE: f32 = 1.5;

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docs2json::{PipelineConfig, ProviderKind, VerificationMode};
///
/// let config = PipelineConfig::builder()
///     .provider(ProviderKind::Gemini)
///     .verification_mode(VerificationMode::Apply)
///     .max_tokens(2048)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Provider used for the extraction call. Default: OpenAI.
    pub provider: ProviderKind,

    /// Model identifier for the extraction call, e.g. "gpt-4o".
    /// If None, uses [`ProviderKind::default_model`].
    pub model: Option<String>,

    /// Provider used for both reconciliation calls. Default: OpenAI.
    pub reconciliation_provider: ProviderKind,

    /// Model for the reconciliation calls. If None, uses the provider default.
    pub reconciliation_model: Option<String>,

    /// API keys for the built-in backends.
    pub credentials: ApiCredentials,

    /// OpenAI-compatible base URL (no trailing slash).
    pub openai_base_url: String,

    /// Gemini base URL (no trailing slash).
    pub gemini_base_url: String,

    /// Page render scale. Range: 0.25–4.0. Default: 1.5.
    ///
    /// 1.5× of the PDF's natural 72-DPI page size gives ~108 DPI, enough for
    /// printed statements and invoices without blowing up the request body.
    pub render_scale: f32,

    /// Maximum tokens the model may generate per extraction call. Default: 4096.
    pub max_tokens: u32,

    /// Sampling temperature. Default: None (provider default).
    pub temperature: Option<f32>,

    /// Per-request timeout for LLM calls in seconds. Default: None (transport default).
    pub request_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom extraction system prompt. If None, uses the built-in default.
    pub extraction_prompt: Option<String>,

    /// Text that precedes the images in the extraction user message.
    pub extraction_preamble: Option<String>,

    /// Instruction prompt for the reconciliation pass. If None, uses the default.
    pub reconciliation_prompt: Option<String>,

    /// What to do with the reconciliation verification pass. Default: [`VerificationMode::Discard`].
    pub verification_mode: VerificationMode,

    /// Abort the whole batch on the first file that fails to rasterise. Default: false.
    pub fail_fast: bool,

    /// Explicit path to the pdfium shared library. If None, the system library path is searched.
    pub pdfium_library_path: Option<PathBuf>,

    /// Lifecycle hooks. Default: None.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: None,
            reconciliation_provider: ProviderKind::OpenAi,
            reconciliation_model: None,
            credentials: ApiCredentials::default(),
            openai_base_url: OPENAI_BASE_URL.to_string(),
            gemini_base_url: GEMINI_BASE_URL.to_string(),
            render_scale: DEFAULT_RENDER_SCALE,
            max_tokens: 4096,
            temperature: None,
            request_timeout_secs: None,
            download_timeout_secs: 120,
            extraction_prompt: None,
            extraction_preamble: None,
            reconciliation_prompt: None,
            verification_mode: VerificationMode::default(),
            fail_fast: false,
            pdfium_library_path: None,
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("reconciliation_provider", &self.reconciliation_provider)
            .field("reconciliation_model", &self.reconciliation_model)
            .field("credentials", &self.credentials)
            .field("openai_base_url", &self.openai_base_url)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("render_scale", &self.render_scale)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("verification_mode", &self.verification_mode)
            .field("fail_fast", &self.fail_fast)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from process environment variables.
    ///
    /// Reads `OPENAI_API_KEY`, `GOOGLE_API_KEY` (or `GEMINI_API_KEY`),
    /// `PDFIUM_LIB_PATH`, `DOCS2JSON_PROVIDER` and `DOCS2JSON_MODEL`. Called
    /// once at startup; the returned value is then passed around explicitly.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PipelineConfig::from_env`] but reading from an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder().credentials(ApiCredentials::from_lookup(&non_empty));

        if let Some(provider) = non_empty("DOCS2JSON_PROVIDER") {
            builder = builder.provider(provider.parse()?);
        }
        if let Some(model) = non_empty("DOCS2JSON_MODEL") {
            builder = builder.model(model);
        }
        if let Some(path) = non_empty("PDFIUM_LIB_PATH") {
            builder = builder.pdfium_library_path(path);
        }

        builder.build()
    }

    /// Model used for extraction, falling back to the provider default.
    pub fn extraction_model(&self) -> Option<&str> {
        self.model
            .as_deref()
            .or_else(|| self.provider.default_model())
    }

    /// Model used for reconciliation, falling back to the provider default.
    pub fn reconciliation_model(&self) -> Option<&str> {
        self.reconciliation_model
            .as_deref()
            .or_else(|| self.reconciliation_provider.default_model())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn reconciliation_provider(mut self, provider: ProviderKind) -> Self {
        self.config.reconciliation_provider = provider;
        self
    }

    pub fn reconciliation_model(mut self, model: impl Into<String>) -> Self {
        self.config.reconciliation_model = Some(model.into());
        self
    }

    pub fn credentials(mut self, credentials: ApiCredentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.openai_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn gemini_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.gemini_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.25, 4.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn extraction_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.config.extraction_preamble = Some(preamble.into());
        self
    }

    pub fn reconciliation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.reconciliation_prompt = Some(prompt.into());
        self
    }

    pub fn verification_mode(mut self, mode: VerificationMode) -> Self {
        self.config.verification_mode = mode;
        self
    }

    pub fn fail_fast(mut self, v: bool) -> Self {
        self.config.fail_fast = v;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        for model in [&c.model, &c.reconciliation_model].into_iter().flatten() {
            if model.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "model name must not be empty".into(),
                ));
            }
        }
        for provider in [&c.provider, &c.reconciliation_provider] {
            if let ProviderKind::Other(name) = provider {
                if name.trim().is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "provider name must not be empty".into(),
                    ));
                }
            }
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// API keys for the two built-in providers.
///
/// `Debug` never prints the keys themselves.
#[derive(Clone, Default)]
pub struct ApiCredentials {
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

impl ApiCredentials {
    pub fn new(openai_api_key: Option<String>, google_api_key: Option<String>) -> Self {
        Self {
            openai_api_key,
            google_api_key,
        }
    }

    /// Read `OPENAI_API_KEY` and `GOOGLE_API_KEY` (falling back to `GEMINI_API_KEY`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            openai_api_key: lookup("OPENAI_API_KEY"),
            google_api_key: lookup("GOOGLE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")),
        }
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiCredentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("google_api_key", &mask(&self.google_api_key))
            .finish()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which LLM service handles a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI chat-completions (default).
    #[default]
    OpenAi,
    /// Google Gemini generate-content.
    Gemini,
    /// Any other vision provider known to `edgequake-llm`
    /// (e.g. "anthropic", "mistral", "ollama").
    Other(String),
}

impl ProviderKind {
    /// Short provider name used in logs and error messages.
    pub fn name(&self) -> &str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Other(name) => name,
        }
    }

    /// Default model for the built-in providers.
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("gpt-4o"),
            ProviderKind::Gemini => Some("gemini-1.5-flash"),
            ProviderKind::Other(_) => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "" => Err(PipelineError::InvalidConfig(
                "provider name must not be empty".into(),
            )),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Ok(ProviderKind::Other(other.to_string())),
        }
    }
}

/// What the reconciliation client does with its second, verification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Make the verification call but return the first-pass text. (default)
    #[default]
    Discard,
    /// Return the verification text when it succeeds.
    Apply,
    /// Do not make the verification call.
    Skip,
}

impl FromStr for VerificationMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discard" => Ok(VerificationMode::Discard),
            "apply" => Ok(VerificationMode::Apply),
            "skip" => Ok(VerificationMode::Skip),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown verification mode '{other}' (expected discard, apply or skip)"
            ))),
        }
    }
}
