//! Result types returned by [`crate::run::Pipeline`].
//!
//! Everything here is `Serialize` so the CLI's `--json` mode can print a full
//! run report: per-file statuses, every provider outcome and the stage
//! timings.

use crate::extract::ExtractionResult;
use crate::pipeline::batch::FileReport;
use crate::reconcile::ReconciliationResult;
use serde::{Deserialize, Serialize};

/// One batch's encoding report and extraction result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExtraction {
    pub files: Vec<FileReport>,
    pub image_count: usize,
    /// `None` when the batch produced no images and no call was made.
    pub extraction: Option<ExtractionResult>,
}

impl BatchExtraction {
    /// The extracted JSON text, if the call succeeded with content.
    pub fn raw_text(&self) -> Option<&str> {
        self.extraction.as_ref().and_then(|e| e.raw_text())
    }
}

/// Full result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub batches: Vec<BatchExtraction>,
    /// `None` when no batch produced a fragment to reconcile.
    pub reconciliation: Option<ReconciliationResult>,
    pub stats: RunStats,
}

impl PipelineOutput {
    /// The reconciled JSON text, if any.
    pub fn final_json_text(&self) -> Option<&str> {
        self.reconciliation
            .as_ref()
            .and_then(|r| r.final_json_text())
    }

    /// Non-empty extraction texts in batch order.
    pub fn fragments(&self) -> Vec<&str> {
        self.batches.iter().filter_map(|b| b.raw_text()).collect()
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_files: usize,
    pub encoded_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub total_images: usize,
    /// Extraction calls actually sent.
    pub extraction_calls: usize,
    /// Extraction calls that ended in a failure outcome.
    pub failed_calls: usize,
    pub encode_ms: u64,
    pub extract_ms: u64,
    pub reconcile_ms: u64,
    pub total_ms: u64,
}
