//! Pipeline entry points: uploaded files → extracted fragments → reconciled
//! JSON.
//!
//! ## Control flow
//!
//! ```text
//! for each batch:  BatchEncoder ──▶ ExtractionClient ──▶ fragment
//! then once:       ReconciliationClient(fragments) ──▶ final JSON text
//! ```
//!
//! Batches, files and pages are processed strictly one after another. Each
//! batch normally holds one document ([`Pipeline::run_per_file`]); the whole
//! upload can also go out as one batch ([`Pipeline::run_single_batch`]).
//!
//! Only fatal problems return `Err`: unreadable inputs, a `fail_fast` abort,
//! an output write failure. Skipped files, failed files and failed provider
//! calls are recorded in the returned [`PipelineOutput`].

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::ExtractionClient;
use crate::observer::{or_noop, SharedObserver};
use crate::output::{BatchExtraction, PipelineOutput, RunStats};
use crate::pipeline::batch::{BatchEncoder, EncodedBatch, FileStatus};
use crate::pipeline::input::{resolve_input, UploadedFile};
use crate::pipeline::normalize::FileNormalizer;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::prompts::{DEFAULT_EXTRACTION_PROMPT, DEFAULT_RECONCILIATION_PROMPT};
use crate::providers::ProviderSet;
use crate::reconcile::{ReconciliationClient, ReconciliationResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A configured pipeline. Cheap to share; holds no per-run state.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    encoder: BatchEncoder,
    extractor: ExtractionClient,
    reconciler: ReconciliationClient,
    observer: SharedObserver,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build the pdfium rasteriser and provider backends from `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let providers = ProviderSet::from_config(&config)?;
        let rasterizer = Arc::new(PdfiumRasterizer::new(
            config.render_scale,
            config.pdfium_library_path.clone(),
        ));
        Ok(Self::from_parts(config, rasterizer, providers))
    }

    /// Assemble a pipeline from explicit parts.
    ///
    /// Useful in tests or when the caller wraps backends with its own
    /// middleware (caching, rate limiting).
    pub fn from_parts(
        config: PipelineConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        providers: ProviderSet,
    ) -> Self {
        let observer = or_noop(config.observer.as_ref());
        let encoder = BatchEncoder::new(FileNormalizer::new(rasterizer))
            .with_observer(Arc::clone(&observer))
            .fail_fast(config.fail_fast);
        let extractor = ExtractionClient::from_config(providers.clone(), &config);
        let reconciler = ReconciliationClient::from_config(providers, &config);

        Self {
            config,
            encoder,
            extractor,
            reconciler,
            observer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// System instruction used for extraction.
    pub fn extraction_instruction(&self) -> &str {
        self.config
            .extraction_prompt
            .as_deref()
            .unwrap_or(DEFAULT_EXTRACTION_PROMPT)
    }

    /// Reconciliation prompt from the config, or the built-in default.
    pub fn default_reconciliation_prompt(&self) -> &str {
        self.config
            .reconciliation_prompt
            .as_deref()
            .unwrap_or(DEFAULT_RECONCILIATION_PROMPT)
    }

    /// Encode one batch without calling any provider.
    pub async fn encode(&self, files: &[UploadedFile]) -> Result<EncodedBatch, PipelineError> {
        self.encoder.encode(files).await
    }

    /// Encode one batch and send it for extraction.
    ///
    /// A batch with no images makes no provider call.
    pub async fn extract_batch(
        &self,
        files: &[UploadedFile],
    ) -> Result<BatchExtraction, PipelineError> {
        let (batch, _, _) = self.extract_batch_timed(files).await?;
        Ok(batch)
    }

    async fn extract_batch_timed(
        &self,
        files: &[UploadedFile],
    ) -> Result<(BatchExtraction, u64, u64), PipelineError> {
        let encode_start = Instant::now();
        let encoded = self.encoder.encode(files).await?;
        let encode_ms = encode_start.elapsed().as_millis() as u64;

        let image_count = encoded.images.len();
        let extract_start = Instant::now();
        let extraction = if image_count == 0 {
            warn!("Batch produced no images; skipping extraction call");
            None
        } else {
            Some(
                self.extractor
                    .extract(
                        self.extraction_instruction(),
                        &encoded.images,
                        &self.config.provider,
                    )
                    .await,
            )
        };
        let extract_ms = extract_start.elapsed().as_millis() as u64;

        Ok((
            BatchExtraction {
                files: encoded.reports,
                image_count,
                extraction,
            },
            encode_ms,
            extract_ms,
        ))
    }

    /// Reconcile fragments with the configured reconciliation client.
    pub async fn reconcile<S: AsRef<str>>(
        &self,
        instruction_prompt: &str,
        fragments: &[S],
    ) -> ReconciliationResult {
        self.reconciler.reconcile(instruction_prompt, fragments).await
    }

    /// Run the full pipeline over `batches`, then reconcile under `prompt`.
    ///
    /// Only non-empty extraction texts are reconciled. If there are none the
    /// reconciliation step is skipped and the output has no final text.
    pub async fn run(
        &self,
        batches: &[Vec<UploadedFile>],
        prompt: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let total_start = Instant::now();
        info!("Starting run: {} batches", batches.len());
        self.observer.on_run_start(batches.len());

        let mut stats = RunStats::default();
        let mut results = Vec::with_capacity(batches.len());

        for (i, files) in batches.iter().enumerate() {
            debug!("Batch {}/{}: {} files", i + 1, batches.len(), files.len());
            let (batch, encode_ms, extract_ms) = self.extract_batch_timed(files).await?;

            stats.total_files += batch.files.len();
            for report in &batch.files {
                match report.status {
                    FileStatus::Encoded { .. } => stats.encoded_files += 1,
                    FileStatus::Skipped => stats.skipped_files += 1,
                    FileStatus::Failed { .. } => stats.failed_files += 1,
                }
            }
            stats.total_images += batch.image_count;
            if let Some(ex) = &batch.extraction {
                stats.extraction_calls += 1;
                if ex.outcome.is_failure() {
                    stats.failed_calls += 1;
                }
            }
            stats.encode_ms += encode_ms;
            stats.extract_ms += extract_ms;

            results.push(batch);
        }

        let fragments: Vec<&str> = results.iter().filter_map(|b| b.raw_text()).collect();

        let reconciliation = if fragments.is_empty() {
            warn!("No extraction produced text; skipping reconciliation");
            None
        } else {
            let start = Instant::now();
            let r = self.reconciler.reconcile(prompt, &fragments).await;
            stats.reconcile_ms = start.elapsed().as_millis() as u64;
            Some(r)
        };

        stats.total_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Run complete: {}/{} files encoded, {} images, {}ms total",
            stats.encoded_files, stats.total_files, stats.total_images, stats.total_ms
        );
        self.observer.on_run_complete(&stats);

        Ok(PipelineOutput {
            batches: results,
            reconciliation,
            stats,
        })
    }

    /// One extraction per file, then reconcile all of them.
    pub async fn run_per_file(
        &self,
        files: &[UploadedFile],
        prompt: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let batches: Vec<Vec<UploadedFile>> = files.iter().map(|f| vec![f.clone()]).collect();
        self.run(&batches, prompt).await
    }

    /// One extraction for the whole upload, then reconcile its result.
    pub async fn run_single_batch(
        &self,
        files: &[UploadedFile],
        prompt: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        self.run(&[files.to_vec()], prompt).await
    }

    /// Run and write the final JSON text to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files. When
    /// the run produced no final text nothing is written.
    pub async fn run_to_file(
        &self,
        batches: &[Vec<UploadedFile>],
        prompt: &str,
        output_path: impl AsRef<Path>,
    ) -> Result<PipelineOutput, PipelineError> {
        let output = self.run(batches, prompt).await?;
        match output.final_json_text() {
            Some(text) => write_atomic(output_path.as_ref(), text).await?,
            None => warn!(
                "No final JSON produced; {} not written",
                output_path.as_ref().display()
            ),
        }
        Ok(output)
    }
}

/// Resolve paths and URLs to uploaded files, in order.
pub async fn load_inputs<S: AsRef<str>>(
    inputs: &[S],
    download_timeout_secs: u64,
) -> Result<Vec<UploadedFile>, PipelineError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        files.push(resolve_input(input.as_ref(), download_timeout_secs).await?);
    }
    Ok(files)
}

/// Write `contents` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), PipelineError> {
    let write_err = |source| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`Pipeline::run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_blocking(
    config: PipelineConfig,
    batches: &[Vec<UploadedFile>],
    prompt: &str,
) -> Result<PipelineOutput, PipelineError> {
    let pipeline = Pipeline::from_config(config)?;
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(pipeline.run(batches, prompt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("result.json");
        write_atomic(&path, "{\"a\":1}").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert!(!dir.path().join("out").join("result.json.tmp").exists());
    }

    #[tokio::test]
    async fn load_inputs_propagates_missing_file() {
        let err = load_inputs(&["/no/such/file.pdf"], 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[test]
    fn instructions_fall_back_to_defaults() {
        let config = PipelineConfig::default();
        let p = Pipeline::from_parts(
            config,
            Arc::new(PdfiumRasterizer::default()),
            ProviderSet::new(),
        );
        assert_eq!(p.extraction_instruction(), DEFAULT_EXTRACTION_PROMPT);
        assert_eq!(p.default_reconciliation_prompt(), DEFAULT_RECONCILIATION_PROMPT);
    }
}
