//! HTTP-level tests for the OpenAI and Gemini backends against a wiremock
//! server. Checks the wire format and the mapping of error statuses onto
//! explicit failure outcomes.

use docs2json::pipeline::encode::data_uri;
use docs2json::providers::{GeminiBackend, OpenAiBackend};
use docs2json::{
    ApiCredentials, CallOutcome, ExtractionClient, ImagePayload, Pipeline, PipelineConfig,
    ProviderCallError, ProviderKind, ProviderSet, ReconciliationClient, UploadedFile,
    VerificationMode,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn images() -> Vec<ImagePayload> {
    vec![
        ImagePayload::new("a.png", 1, data_uri("image/png", b"first")),
        ImagePayload::new("b.jpg", 1, data_uri("image/jpeg", b"second")),
    ]
}

fn openai(server: &MockServer) -> ProviderSet {
    let backend = OpenAiBackend::new("sk-test", "gpt-4o", Some(Duration::from_secs(5)))
        .unwrap()
        .with_base_url(&server.uri());
    ProviderSet::new().with(ProviderKind::OpenAi, Arc::new(backend))
}

fn gemini(server: &MockServer) -> ProviderSet {
    let backend = GeminiBackend::new("g-test", "gemini-1.5-flash", Some(Duration::from_secs(5)))
        .unwrap()
        .with_base_url(&server.uri());
    ProviderSet::new().with(ProviderKind::Gemini, Arc::new(backend))
}

fn openai_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
    }))
}

// ── OpenAI ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_extraction_sends_image_url_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o", "max_tokens": 4096 })))
        .respond_with(openai_reply(r#"{"a":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    let client = ExtractionClient::new(openai(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::OpenAi)
        .await;
    assert_eq!(result.raw_text(), Some(r#"{"a":1}"#));
    assert_eq!(result.image_count, 2);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "Return JSON.");

    let parts = messages[1]["content"].as_array().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(
        parts[0]["text"],
        "Please analyze these documents and convert them to JSON:"
    );
    assert_eq!(parts[1]["type"], "image_url");
    assert_eq!(parts[1]["image_url"]["url"], data_uri("image/png", b"first"));
    assert_eq!(parts[2]["image_url"]["url"], data_uri("image/jpeg", b"second"));
}

#[tokio::test]
async fn openai_401_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
        })))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(openai(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::OpenAi)
        .await;
    match result.outcome {
        CallOutcome::Failure(ProviderCallError::Auth { provider, detail }) => {
            assert_eq!(provider, "openai");
            assert!(detail.contains("Incorrect API key"));
        }
        other => panic!("expected auth failure, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_429_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(openai(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::OpenAi)
        .await;
    assert_eq!(
        result.outcome.error(),
        Some(&ProviderCallError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: Some(7),
        })
    );
}

#[tokio::test]
async fn openai_500_is_api_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(openai(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::OpenAi)
        .await;
    match result.outcome.error() {
        Some(ProviderCallError::Api {
            status, message, ..
        }) => {
            assert_eq!(*status, 500);
            assert!(message.contains("upstream exploded"));
        }
        other => panic!("expected API failure, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_without_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(openai(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::OpenAi)
        .await;
    assert!(matches!(
        result.outcome.error(),
        Some(ProviderCallError::MalformedResponse { .. })
    ));
}

#[tokio::test]
async fn openai_reconciliation_is_text_only_and_verifies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(openai_reply(r#"{"x":5}"#))
        .expect(2)
        .mount(&server)
        .await;

    let client = ReconciliationClient::new(openai(&server), ProviderKind::OpenAi)
        .with_mode(VerificationMode::Discard);
    let result = client
        .reconcile("sum these", &[r#"{"x":2}"#, r#"{"x":3}"#])
        .await;
    assert_eq!(result.final_json_text(), Some(r#"{"x":5}"#));

    let received = server.received_requests().await.unwrap();
    let first: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let messages = first["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], r#"sum these {"x":2}, {"x":3}, "#);
}

#[tokio::test]
async fn reconciliation_keeps_its_own_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(openai_reply(r#"{"x":5}"#))
        .expect(3)
        .mount(&server)
        .await;

    let config = PipelineConfig::builder()
        .model("gpt-4o-mini")
        .credentials(ApiCredentials::new(Some("sk-test".into()), None))
        .openai_base_url(server.uri())
        .build()
        .unwrap();
    let pipeline = Pipeline::from_config(config).unwrap();

    let png = UploadedFile::from_bytes("a.png", "image/png", b"png".to_vec());
    let batch = pipeline.extract_batch(&[png]).await.unwrap();
    assert_eq!(batch.raw_text(), Some(r#"{"x":5}"#));
    pipeline.reconcile("sum these", &[r#"{"x":5}"#]).await;

    let models: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["model"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(models, vec!["gpt-4o-mini", "gpt-4o", "gpt-4o"]);
}

// ── Gemini ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_extraction_sends_inline_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .and(header("x-goog-api-key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "{\"total\":10}" }] }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ExtractionClient::new(gemini(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::Gemini)
        .await;
    assert_eq!(result.raw_text(), Some(r#"{"total":10}"#));

    let received = server.received_requests().await.unwrap();
    assert!(!received[0].url.as_str().contains("key="));
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Return JSON.");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);

    let parts = body["contents"][0]["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(
        parts[0]["text"],
        "Please analyze these documents and convert them to JSON:"
    );
    assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    assert_eq!(parts[2]["inlineData"]["mimeType"], "image/jpeg");
    assert!(!parts[1]["inlineData"]["data"]
        .as_str()
        .unwrap()
        .starts_with("data:"));
}

#[tokio::test]
async fn gemini_403_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" }
        })))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(gemini(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::Gemini)
        .await;
    assert!(matches!(
        result.outcome.error(),
        Some(ProviderCallError::Auth { .. })
    ));
}

#[tokio::test]
async fn gemini_429_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(gemini(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::Gemini)
        .await;
    assert!(matches!(
        result.outcome.error(),
        Some(ProviderCallError::RateLimited {
            retry_after_secs: None,
            ..
        })
    ));
}

#[tokio::test]
async fn gemini_candidate_without_content_is_empty_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        })))
        .mount(&server)
        .await;

    let client = ExtractionClient::new(gemini(&server));
    let result = client
        .extract("Return JSON.", &images(), &ProviderKind::Gemini)
        .await;
    assert!(!result.outcome.is_failure());
    assert_eq!(result.raw_text(), None);
}
