//! # docs2json
//!
//! Turn financial documents (PDFs and scanned images) into structured JSON
//! with multimodal language models, then reconcile several documents into one
//! validated result.
//!
//! ## Why this crate?
//!
//! Statements, invoices and receipts arrive as PDFs and phone photos with
//! wildly different layouts. Instead of writing a parser per issuer, this
//! crate rasterises every page into a PNG and lets a vision model read it as
//! a human would, asking for JSON back. A second, text-only pass merges the
//! per-document JSON under a free-form instruction (for example "match the
//! transactions between these statements").
//!
//! ## Pipeline Overview
//!
//! ```text
//! files (PDF / image)
//!  │
//!  ├─ 1. Input      read path / URL / bytes, detect MIME type
//!  ├─ 2. Normalise  PDF → pages via pdfium (spawn_blocking); images pass through
//!  ├─ 3. Encode     PNG / image bytes → base64 data URIs, in upload order
//!  ├─ 4. Extract    one multimodal call per batch (OpenAI or Gemini) → JSON text
//!  └─ 5. Reconcile  prompt + fragments → first pass, then a verification pass
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docs2json::{Pipeline, PipelineConfig, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys from OPENAI_API_KEY / GOOGLE_API_KEY, read once here.
//!     let config = PipelineConfig::from_env()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let files = vec![
//!         UploadedFile::from_path("statement.pdf").await?,
//!         UploadedFile::from_path("receipt.jpg").await?,
//!     ];
//!     let output = pipeline
//!         .run_per_file(&files, "Match the receipt against the statement:")
//!         .await?;
//!
//!     println!("{}", output.final_json_text().unwrap_or("{}"));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docs2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! docs2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod reconcile;
pub mod run;
pub mod settings;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ApiCredentials, PipelineConfig, PipelineConfigBuilder, ProviderKind, VerificationMode};
pub use error::{FileError, PipelineError, ProviderCallError, RasterError, SettingsError};
pub use extract::{CallOutcome, ExtractionClient, ExtractionRequest, ExtractionResult};
pub use observer::{CallStage, NoopObserver, PipelineObserver};
pub use output::{BatchExtraction, PipelineOutput, RunStats};
pub use pipeline::batch::{BatchEncoder, EncodedBatch, FileReport, FileStatus};
pub use pipeline::encode::ImagePayload;
pub use pipeline::input::UploadedFile;
pub use pipeline::normalize::{FileKind, FileNormalizer};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use providers::{ChatBackend, ChatRequest, ProviderSet};
pub use reconcile::{ReconciliationClient, ReconciliationRequest, ReconciliationResult};
pub use run::{load_inputs, run_blocking, Pipeline};
pub use settings::{AdminCredentials, AdminSession, SettingsController};
