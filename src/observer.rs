//! Lifecycle hooks for a pipeline run.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive events as the
//! pipeline reads files, renders pages and calls the LLM providers.
//!
//! # Why hooks instead of channels?
//!
//! Callers can forward events to a progress bar, a log sink or a metrics
//! system without the library knowing how the host application reports
//! progress. Every hook has a default no-op body, so implementations only
//! override what they care about.
//!
//! # Example
//!
//! ```rust
//! use docs2json::{PipelineObserver, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl PipelineObserver for PageCounter {
//!     fn on_page_rendered(&self, file: &str, page: usize, total: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{file}: page {page}/{total}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .observer(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which LLM call a provider hook refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStage {
    Extraction,
    Reconciliation,
    Verification,
}

impl fmt::Display for CallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallStage::Extraction => "extraction",
            CallStage::Reconciliation => "reconciliation",
            CallStage::Verification => "verification",
        })
    }
}

/// Called by the pipeline at each lifecycle point.
///
/// Files and pages are processed strictly in order, so hooks for one run are
/// never called concurrently. Implementations must still be `Send + Sync`
/// because the observer is shared with blocking render tasks.
pub trait PipelineObserver: Send + Sync {
    /// Called once before the first batch is encoded.
    fn on_run_start(&self, total_batches: usize) {
        let _ = total_batches;
    }

    /// Called before a file is normalised.
    fn on_file_start(&self, name: &str, mime_type: &str) {
        let _ = (name, mime_type);
    }

    /// Called after each PDF page has been rendered and encoded.
    ///
    /// # Arguments
    /// * `page`: 1-indexed page number
    /// * `total`: page count of the document
    fn on_page_rendered(&self, file: &str, page: usize, total: usize) {
        let _ = (file, page, total);
    }

    /// Called when a file produced its images.
    fn on_file_complete(&self, name: &str, images: usize) {
        let _ = (name, images);
    }

    /// Called when a file was skipped because its type is unsupported.
    fn on_file_skipped(&self, name: &str, mime_type: &str) {
        let _ = (name, mime_type);
    }

    /// Called when a file could not be rasterised.
    fn on_file_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called just before a request is sent to a provider.
    fn on_provider_call_start(&self, stage: CallStage, provider: &str, image_count: usize) {
        let _ = (stage, provider, image_count);
    }

    /// Called when a provider call returned text (possibly empty).
    fn on_provider_call_complete(
        &self,
        stage: CallStage,
        provider: &str,
        text_len: usize,
        duration_ms: u64,
    ) {
        let _ = (stage, provider, text_len, duration_ms);
    }

    /// Called when a provider call failed. The failure is not propagated.
    fn on_provider_call_error(&self, stage: CallStage, provider: &str, error: &str) {
        let _ = (stage, provider, error);
    }

    /// Called once after the run finished.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Shared observer handle as stored in [`crate::config::PipelineConfig`].
pub type SharedObserver = Arc<dyn PipelineObserver>;

/// Resolve an optional observer to a usable handle.
pub(crate) fn or_noop(observer: Option<&SharedObserver>) -> SharedObserver {
    observer.cloned().unwrap_or_else(|| Arc::new(NoopObserver))
}
