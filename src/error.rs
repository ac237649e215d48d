//! Error types for the docs2json library.
//!
//! Failures are split by how far they are allowed to travel:
//!
//! * **Fatal** ([`PipelineError`]): the run cannot proceed at all (unreadable
//!   input path, invalid configuration, output write failure). Returned as
//!   `Err(PipelineError)` from the top-level `run*` functions.
//!
//! * **Per file** ([`FileError`], [`RasterError`]): one uploaded document
//!   could not be turned into images. Recorded in the batch's
//!   [`crate::pipeline::batch::FileReport`] and the batch continues, unless
//!   the caller asked for `fail_fast`.
//!
//! * **Per call** ([`ProviderCallError`]): an LLM request failed. Never
//!   propagated past the extraction/reconciliation clients; it is stored in
//!   [`crate::extract::CallOutcome::Failure`] so callers can tell "the call
//!   failed" apart from "the model said nothing".

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docs2json library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file failed for another reason.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Batch errors ──────────────────────────────────────────────────────
    /// A file failed while `fail_fast` was set.
    #[error("Batch aborted: {0}")]
    BatchAborted(#[from] FileError),

    // ── Provider errors ───────────────────────────────────────────────────
    /// A provider backend could not be constructed.
    #[error("LLM provider '{provider}' could not be initialised: {detail}")]
    ProviderInit { provider: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rasterisation failure for one PDF document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RasterError {
    /// PDF header/trailer/xref is corrupt, or the bytes are not a PDF.
    #[error("document could not be loaded: {detail}")]
    DocumentLoad { detail: String },

    /// The PDF is encrypted; passwords are not supported for uploads.
    #[error("document is encrypted and requires a password")]
    PasswordRequired,

    /// pdfium returned an error for a specific page (1-indexed).
    #[error("page {page} failed to render: {detail}")]
    PageRender { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium on the system library path."
    )]
    PdfiumBinding(String),

    /// The blocking render task died.
    #[error("render task failed: {0}")]
    Internal(String),
}

/// A non-fatal error for a single uploaded file.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The PDF could not be turned into page images.
    #[error("'{file}': {source}")]
    Rasterisation {
        file: String,
        #[source]
        source: RasterError,
    },
}

impl FileError {
    /// Name of the file the error belongs to.
    pub fn file_name(&self) -> &str {
        match self {
            FileError::Rasterisation { file, .. } => file,
        }
    }
}

/// A failed LLM call. Converted into an explicit failure outcome at the
/// client boundary, never raised to the caller.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ProviderCallError {
    /// No backend is available for the requested provider (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured. {hint}")]
    NotConfigured { provider: String, hint: String },

    /// The request never produced an HTTP response.
    #[error("transport error talking to '{provider}': {detail}")]
    Transport { provider: String, detail: String },

    /// The configured request timeout elapsed.
    #[error("request to '{provider}' timed out")]
    Timeout { provider: String },

    /// HTTP 401/403: retrying will not help.
    #[error("authentication error from provider '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// HTTP 429.
    #[error("rate limit exceeded for provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// Any other non-success HTTP status.
    #[error("provider '{provider}' returned HTTP {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("malformed response from '{provider}': {detail}")]
    MalformedResponse { provider: String, detail: String },
}

/// Errors from the admin settings controller.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Reconciliation prompt must not be empty")]
    EmptyPrompt,

    #[error("Prompt store '{path}' could not be accessed: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
