//! Pipeline integration tests with a fake rasteriser and stub chat backends.
//!
//! No network and no native pdfium are needed: PDFs are "rendered" by a
//! rasteriser that produces one real PNG per page marker in the input, and
//! every provider call is answered by an in-process backend.

use async_trait::async_trait;
use docs2json::pipeline::encode::{encode_png_data_uri, split_data_uri};
use docs2json::{
    CallOutcome, CallStage, ChatBackend, ChatRequest, FileStatus, PageRasterizer, Pipeline,
    PipelineConfig, PipelineError, PipelineObserver, ProviderCallError, ProviderKind,
    ProviderSet, RasterError, RunStats, UploadedFile, VerificationMode,
};
use docs2json::pipeline::postprocess::extract_json;
use image::{DynamicImage, RgbImage};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Treats every `%PAGE` marker in the bytes as one page and renders each as
/// a tiny solid PNG. Bytes starting with `%BROKEN` fail to load.
struct MarkerRasterizer;

impl PageRasterizer for MarkerRasterizer {
    fn rasterize_observed(
        &self,
        pdf_bytes: &[u8],
        on_page: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<String>, RasterError> {
        if pdf_bytes.starts_with(b"%BROKEN") {
            return Err(RasterError::DocumentLoad {
                detail: "not a PDF".into(),
            });
        }
        let total = pdf_bytes.windows(5).filter(|w| w == b"%PAGE").count();
        let mut out = Vec::with_capacity(total);
        for page in 1..=total {
            let shade = (page * 40) as u8;
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([shade; 3])));
            let uri = encode_png_data_uri(&img).map_err(|e| RasterError::PageRender {
                page,
                detail: e.to_string(),
            })?;
            out.push(uri);
            on_page(page, total);
        }
        Ok(out)
    }
}

fn pdf(name: &str, pages: usize) -> UploadedFile {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    for _ in 0..pages {
        bytes.extend_from_slice(b"%PAGE\n");
    }
    UploadedFile::from_bytes(name, "application/pdf", bytes)
}

fn png(name: &str) -> UploadedFile {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0])));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    UploadedFile::detect(name, bytes)
}

fn text_file(name: &str) -> UploadedFile {
    UploadedFile::from_bytes(name, "text/plain", b"hello".to_vec())
}

/// Replies from a queue (last reply repeats) and records every request.
struct ScriptedBackend {
    name: &'static str,
    replies: Mutex<VecDeque<Result<String, ProviderCallError>>>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    fn new(name: &'static str, replies: Vec<Result<String, ProviderCallError>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn always(name: &'static str, reply: &str) -> Arc<Self> {
        Self::new(name, vec![Ok(reply.to_string())])
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderCallError> {
        self.seen.lock().unwrap().push(request.clone());
        let mut q = self.replies.lock().unwrap();
        if q.len() > 1 {
            q.pop_front().unwrap()
        } else {
            q.front().cloned().unwrap()
        }
    }
}

/// Returns the user text unchanged.
struct EchoBackend;

#[async_trait]
impl ChatBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-model"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderCallError> {
        Ok(request.text.clone())
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl PipelineObserver for EventLog {
    fn on_file_complete(&self, name: &str, images: usize) {
        self.0.lock().unwrap().push(format!("done {name} {images}"));
    }
    fn on_file_skipped(&self, name: &str, _mime_type: &str) {
        self.0.lock().unwrap().push(format!("skip {name}"));
    }
    fn on_provider_call_start(&self, stage: CallStage, _provider: &str, _images: usize) {
        self.0.lock().unwrap().push(format!("call {stage}"));
    }
    fn on_run_complete(&self, stats: &RunStats) {
        self.0
            .lock()
            .unwrap()
            .push(format!("end {}", stats.total_files));
    }
}

/// Route library logs to the test harness; `RUST_LOG` overrides the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Replace every leaf of a JSON value by its type name.
fn shape(v: &Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), shape(v))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(shape).collect()),
        Value::String(_) => Value::from("string"),
        Value::Number(_) => Value::from("number"),
        Value::Bool(_) => Value::from("bool"),
        Value::Null => Value::Null,
    }
}

fn pipeline_with(
    config: PipelineConfig,
    extraction: Arc<dyn ChatBackend>,
    reconciliation: Arc<dyn ChatBackend>,
) -> Pipeline {
    init_tracing();
    let providers = ProviderSet::new()
        .with(ProviderKind::Gemini, extraction)
        .with(ProviderKind::OpenAi, reconciliation);
    Pipeline::from_parts(config, Arc::new(MarkerRasterizer), providers)
}

fn gemini_config() -> PipelineConfig {
    PipelineConfig::builder()
        .provider(ProviderKind::Gemini)
        .reconciliation_provider(ProviderKind::OpenAi)
        .build()
        .unwrap()
}

// ── End-to-end scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_pdf_is_one_extraction_with_two_images() {
    let extractor = ScriptedBackend::always("gemini", r#"{"a":1}"#);
    let p = pipeline_with(gemini_config(), extractor.clone(), Arc::new(EchoBackend));

    let files = [pdf("statement.pdf", 2)];
    let encoded = p.encode(&files).await.unwrap();
    assert_eq!(encoded.images.len(), 2);
    assert_eq!(encoded.images[0].page, 1);
    assert_eq!(encoded.images[1].page, 2);

    let batch = p.extract_batch(&files).await.unwrap();
    assert_eq!(batch.image_count, 2);
    assert_eq!(batch.raw_text(), Some(r#"{"a":1}"#));

    let reqs = extractor.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].images.len(), 2);
    assert_eq!(reqs[0].max_tokens, Some(4096));
    assert!(reqs[0].system.as_deref().unwrap().contains("JSON"));
    assert!(reqs[0].text.contains("convert them to JSON"));
}

#[tokio::test]
async fn png_passes_through_as_png_data_uri() {
    let p = pipeline_with(
        gemini_config(),
        Arc::new(EchoBackend),
        Arc::new(EchoBackend),
    );
    let encoded = p.encode(&[png("receipt.png")]).await.unwrap();
    assert_eq!(encoded.images.len(), 1);
    assert!(encoded.images[0]
        .encoding
        .starts_with("data:image/png;base64,"));
    assert_eq!(encoded.images[0].source_file_name, "receipt.png");
}

#[tokio::test]
async fn unsupported_file_yields_nothing_and_no_call() {
    let extractor = ScriptedBackend::always("gemini", "{}");
    let p = pipeline_with(gemini_config(), extractor.clone(), Arc::new(EchoBackend));

    let encoded = p.encode(&[text_file("notes.txt")]).await.unwrap();
    assert!(encoded.images.is_empty());
    assert!(matches!(
        encoded.reports[0].status,
        FileStatus::Skipped
    ));

    let batch = p.extract_batch(&[text_file("notes.txt")]).await.unwrap();
    assert!(batch.extraction.is_none());
    assert!(extractor.requests().is_empty());
}

#[tokio::test]
async fn reconcile_returns_first_pass_and_discards_verification() {
    let reconciler = ScriptedBackend::new(
        "openai",
        vec![
            Ok(r#"sum these {"x":2}, {"x":3}"#.to_string()),
            Ok(r#"{"verified":"something else"}"#.to_string()),
        ],
    );
    let p = pipeline_with(gemini_config(), Arc::new(EchoBackend), reconciler.clone());

    let result = p.reconcile("sum these", &[r#"{"x":2}"#, r#"{"x":3}"#]).await;
    assert_eq!(result.mode, VerificationMode::Discard);
    assert_eq!(
        result.final_json_text(),
        Some(r#"sum these {"x":2}, {"x":3}"#)
    );
    assert_eq!(
        result.verification.as_ref().and_then(|v| v.text()),
        Some(r#"{"verified":"something else"}"#)
    );

    let reqs = reconciler.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].text, r#"sum these {"x":2}, {"x":3}, "#);
    assert!(reqs[0].images.is_empty());
    assert!(reqs[1]
        .text
        .ends_with(r#"Aqui tienes los jsons de entrada: sum these {"x":2}, {"x":3}"#));
}

#[tokio::test]
async fn echo_reconciler_returns_combined_message_verbatim() {
    let p = pipeline_with(gemini_config(), Arc::new(EchoBackend), Arc::new(EchoBackend));
    let result = p.reconcile("sum these", &[r#"{"x":2}"#, r#"{"x":3}"#]).await;
    assert_eq!(
        result.final_json_text(),
        Some(r#"sum these {"x":2}, {"x":3}, "#)
    );
}

#[tokio::test]
async fn reconciling_twice_gives_the_same_shape() {
    let reconciler = ScriptedBackend::new(
        "openai",
        vec![
            Ok(r#"{"total":5,"items":[{"x":2},{"x":3}]}"#.to_string()),
            Ok("ignored".to_string()),
            Ok("```json\n{\"total\":5,\"items\":[{\"x\":3},{\"x\":2}]}\n```".to_string()),
            Ok("ignored".to_string()),
        ],
    );
    let p = pipeline_with(gemini_config(), Arc::new(EchoBackend), reconciler.clone());
    let fragments = [r#"{"x":2}"#, r#"{"x":3}"#];

    let first = p.reconcile("sum these", &fragments).await;
    let second = p.reconcile("sum these", &fragments).await;

    let a = extract_json(first.final_json_text().unwrap()).unwrap();
    let b = extract_json(second.final_json_text().unwrap()).unwrap();
    assert_eq!(shape(&a), shape(&b));

    let reqs = reconciler.requests();
    assert_eq!(reqs.len(), 4);
    assert_eq!(reqs[0].text, reqs[2].text);
}

// ── Ordering and batching ────────────────────────────────────────────────────

#[tokio::test]
async fn images_follow_upload_order_then_page_order() {
    let p = pipeline_with(gemini_config(), Arc::new(EchoBackend), Arc::new(EchoBackend));
    let files = [png("a.png"), pdf("b.pdf", 3), text_file("c.txt"), png("d.png")];

    let encoded = p.encode(&files).await.unwrap();
    let order: Vec<(String, usize)> = encoded
        .images
        .iter()
        .map(|i| (i.source_file_name.clone(), i.page))
        .collect();
    assert_eq!(
        order,
        vec![
            ("a.png".to_string(), 1),
            ("b.pdf".to_string(), 1),
            ("b.pdf".to_string(), 2),
            ("b.pdf".to_string(), 3),
            ("d.png".to_string(), 1),
        ]
    );
    assert_eq!(encoded.reports.len(), 4);
    for img in &encoded.images {
        let (mime, data) = split_data_uri(&img.encoding).unwrap();
        assert_eq!(mime, "image/png");
        assert!(!data.is_empty());
    }
}

#[tokio::test]
async fn encoding_is_deterministic() {
    let p = pipeline_with(gemini_config(), Arc::new(EchoBackend), Arc::new(EchoBackend));
    let files = [pdf("b.pdf", 2), png("a.png")];
    let first = p.encode(&files).await.unwrap();
    let second = p.encode(&files).await.unwrap();
    let uris = |b: &docs2json::EncodedBatch| {
        b.images.iter().map(|i| i.encoding.clone()).collect::<Vec<_>>()
    };
    assert_eq!(uris(&first), uris(&second));
}

#[tokio::test]
async fn broken_pdf_is_recorded_and_batch_continues() {
    let p = pipeline_with(gemini_config(), Arc::new(EchoBackend), Arc::new(EchoBackend));
    let broken = UploadedFile::from_bytes("bad.pdf", "application/pdf", b"%BROKEN".to_vec());

    let encoded = p.encode(&[broken.clone(), png("ok.png")]).await.unwrap();
    assert_eq!(encoded.images.len(), 1);
    match &encoded.reports[0].status {
        FileStatus::Failed { error } => assert_eq!(error.file_name(), "bad.pdf"),
        other => panic!("expected failure, got {other:?}"),
    }

    let strict = PipelineConfig::builder()
        .provider(ProviderKind::Gemini)
        .fail_fast(true)
        .build()
        .unwrap();
    let p = pipeline_with(strict, Arc::new(EchoBackend), Arc::new(EchoBackend));
    let err = p.encode(&[broken, png("ok.png")]).await.unwrap_err();
    assert!(matches!(err, PipelineError::BatchAborted(_)));
}

// ── Full runs ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_per_file_extracts_each_then_reconciles_in_order() {
    let extractor = ScriptedBackend::new(
        "gemini",
        vec![
            Ok(r#"{"doc":1}"#.to_string()),
            Ok(r#"{"doc":2}"#.to_string()),
        ],
    );
    let reconciler = ScriptedBackend::always("openai", r#"{"total":3}"#);
    let log = Arc::new(EventLog::default());
    let config = PipelineConfig::builder()
        .provider(ProviderKind::Gemini)
        .observer(log.clone())
        .build()
        .unwrap();
    let p = pipeline_with(config, extractor.clone(), reconciler.clone());

    let out = p
        .run_per_file(&[pdf("jan.pdf", 1), text_file("x.txt"), png("feb.png")], "add:")
        .await
        .unwrap();

    assert_eq!(out.batches.len(), 3);
    assert_eq!(out.fragments(), vec![r#"{"doc":1}"#, r#"{"doc":2}"#]);
    assert_eq!(out.final_json_text(), Some(r#"{"total":3}"#));
    assert_eq!(out.stats.total_files, 3);
    assert_eq!(out.stats.encoded_files, 2);
    assert_eq!(out.stats.skipped_files, 1);
    assert_eq!(out.stats.extraction_calls, 2);
    assert_eq!(out.stats.total_images, 2);

    assert_eq!(extractor.requests().len(), 2);
    assert_eq!(
        reconciler.requests()[0].text,
        r#"add: {"doc":1}, {"doc":2}, "#
    );

    let events = log.0.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("done jan.pdf 1"));
    assert!(events.contains(&"skip x.txt".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("end 3"));
    let calls: Vec<_> = events.iter().filter(|e| e.starts_with("call")).collect();
    assert_eq!(
        calls,
        vec![
            "call extraction",
            "call extraction",
            "call reconciliation",
            "call verification"
        ]
    );
}

#[tokio::test]
async fn failed_extraction_is_kept_and_excluded_from_reconciliation() {
    let extractor = ScriptedBackend::new(
        "gemini",
        vec![
            Err(ProviderCallError::RateLimited {
                provider: "gemini".into(),
                retry_after_secs: Some(7),
            }),
            Ok(r#"{"doc":2}"#.to_string()),
        ],
    );
    let reconciler = ScriptedBackend::always("openai", "{}");
    let p = pipeline_with(gemini_config(), extractor, reconciler.clone());

    let out = p
        .run_per_file(&[png("a.png"), png("b.png")], "merge:")
        .await
        .unwrap();

    let first = out.batches[0].extraction.as_ref().unwrap();
    assert!(matches!(
        first.outcome,
        CallOutcome::Failure(ProviderCallError::RateLimited { .. })
    ));
    assert_eq!(out.stats.failed_calls, 1);
    assert_eq!(reconciler.requests()[0].text, r#"merge: {"doc":2}, "#);
}

#[tokio::test]
async fn empty_extraction_counts_as_no_fragment() {
    let extractor = ScriptedBackend::always("gemini", "   ");
    let reconciler = ScriptedBackend::always("openai", "{}");
    let p = pipeline_with(gemini_config(), extractor, reconciler.clone());

    let out = p.run_single_batch(&[png("a.png")], "merge:").await.unwrap();
    let ex = out.batches[0].extraction.as_ref().unwrap();
    assert!(!ex.outcome.is_failure());
    assert_eq!(ex.raw_text(), None);
    assert!(out.reconciliation.is_none());
    assert!(reconciler.requests().is_empty());
}

#[tokio::test]
async fn single_batch_sends_all_images_in_one_request() {
    let extractor = ScriptedBackend::always("gemini", "[]");
    let p = pipeline_with(gemini_config(), extractor.clone(), Arc::new(EchoBackend));

    let out = p
        .run_single_batch(&[pdf("a.pdf", 2), png("b.png")], "merge:")
        .await
        .unwrap();
    assert_eq!(out.batches.len(), 1);
    let reqs = extractor.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].images.len(), 3);
}

#[tokio::test]
async fn apply_mode_uses_verified_text() {
    let reconciler = ScriptedBackend::new(
        "openai",
        vec![Ok("{\"x\":5}".to_string()), Ok("{\"x\":5,\"ok\":true}".to_string())],
    );
    let config = PipelineConfig::builder()
        .provider(ProviderKind::Gemini)
        .verification_mode(VerificationMode::Apply)
        .build()
        .unwrap();
    let p = pipeline_with(config, Arc::new(EchoBackend), reconciler);
    let r = p.reconcile("sum", &["{\"x\":2}", "{\"x\":3}"]).await;
    assert_eq!(r.final_json_text(), Some("{\"x\":5,\"ok\":true}"));
}

#[tokio::test]
async fn missing_provider_is_a_failure_outcome_not_an_error() {
    let p = Pipeline::from_parts(
        gemini_config(),
        Arc::new(MarkerRasterizer),
        ProviderSet::new(),
    );
    let batch = p.extract_batch(&[png("a.png")]).await.unwrap();
    let outcome = &batch.extraction.as_ref().unwrap().outcome;
    assert!(matches!(
        outcome.error(),
        Some(ProviderCallError::NotConfigured { .. })
    ));
}

#[tokio::test]
async fn run_to_file_writes_final_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    let p = pipeline_with(
        gemini_config(),
        ScriptedBackend::always("gemini", "{\"a\":1}"),
        ScriptedBackend::always("openai", "{\"merged\":true}"),
    );

    let out = p
        .run_to_file(&[vec![png("a.png")]], "merge:", &path)
        .await
        .unwrap();
    assert_eq!(out.final_json_text(), Some("{\"merged\":true}"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"merged\":true}");
}
