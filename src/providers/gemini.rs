//! Google Gemini generate-content backend.
//!
//! `POST {base}/models/{model}:generateContent` with the key in the
//! `x-goog-api-key` header (never in the query string, where it would end up
//! in proxy logs). Images travel as `inlineData` parts with the bare base64
//! payload; the answer is the first text part of `candidates[0]`.

use super::{http_client, status_error, transport_error, ChatBackend, ChatRequest};
use crate::config::GEMINI_BASE_URL;
use crate::error::{PipelineError, ProviderCallError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "gemini";

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
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
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

fn build_body(request: &ChatRequest) -> GenerateBody {
    let mut parts = Vec::with_capacity(request.images.len() + 1);
    parts.push(Part::Text {
        text: request.text.clone(),
    });
    parts.extend(request.images.iter().map(|img| Part::Inline {
        inline_data: InlineData {
            mime_type: img.mime_type().to_string(),
            data: img.base64_data().to_string(),
        },
    }));

    let generation_config = (request.max_tokens.is_some() || request.temperature.is_some())
        .then_some(GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
        });

    GenerateBody {
        system_instruction: request.system.as_ref().map(|s| Content {
            role: None,
            parts: vec![Part::Text { text: s.clone() }],
        }),
        contents: vec![Content {
            role: Some("user"),
            parts,
        }],
        generation_config,
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderCallError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("POST {} ({} images)", url, request.images.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(status_error(PROVIDER, response).await);
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderCallError::MalformedResponse {
                    provider: PROVIDER.to_string(),
                    detail: e.to_string(),
                })?;

        let candidate =
            parsed
                .candidates
                .into_iter()
                .next()
                .ok_or_else(|| ProviderCallError::MalformedResponse {
                    provider: PROVIDER.to_string(),
                    detail: "response has no candidates".into(),
                })?;

        // A candidate blocked by safety filters has no content; treat as empty.
        Ok(candidate
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .unwrap_or_default())
    }
}
