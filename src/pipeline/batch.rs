//! Batch encoding: apply the [`FileNormalizer`] to every file of a batch.
//!
//! The output image list is the concatenation of each file's payloads in
//! upload order, with page order preserved inside each file. The batch is
//! never reordered, deduplicated or truncated.
//!
//! Every input file gets exactly one [`FileReport`], so callers can tell an
//! encoded file from a skipped one or a failed one without parsing logs.

use crate::error::{FileError, PipelineError};
use crate::observer::{NoopObserver, SharedObserver};
use crate::pipeline::encode::ImagePayload;
use crate::pipeline::input::UploadedFile;
use crate::pipeline::normalize::{FileKind, FileNormalizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// The file produced `images` payloads.
    Encoded { images: usize },
    /// The MIME type (on the report) is neither PDF nor image.
    Skipped,
    /// Rasterisation failed; the file contributed no images.
    Failed { error: FileError },
}

/// Outcome for one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub file_name: String,
    pub mime_type: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

impl FileReport {
    pub fn is_encoded(&self) -> bool {
        matches!(self.status, FileStatus::Encoded { .. })
    }
}

/// Result of encoding one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodedBatch {
    /// All images in upload order, then page order.
    pub images: Vec<ImagePayload>,
    /// One report per input file, in input order.
    pub reports: Vec<FileReport>,
}

impl EncodedBatch {
    pub fn into_images(self) -> Vec<ImagePayload> {
        self.images
    }

    pub fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Encodes whole batches of uploaded files.
#[derive(Clone)]
pub struct BatchEncoder {
    normalizer: FileNormalizer,
    observer: SharedObserver,
    fail_fast: bool,
}

impl BatchEncoder {
    pub fn new(normalizer: FileNormalizer) -> Self {
        Self {
            normalizer,
            observer: Arc::new(NoopObserver),
            fail_fast: false,
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.normalizer = self.normalizer.with_observer(Arc::clone(&observer));
        self.observer = observer;
        self
    }

    /// Abort on the first rasterisation failure instead of recording it.
    pub fn fail_fast(mut self, v: bool) -> Self {
        self.fail_fast = v;
        self
    }

    /// Encode `files` strictly in order, one at a time.
    ///
    /// Only returns `Err` when `fail_fast` is set and a file fails.
    pub async fn encode(&self, files: &[UploadedFile]) -> Result<EncodedBatch, PipelineError> {
        let mut batch = EncodedBatch {
            images: Vec::new(),
            reports: Vec::with_capacity(files.len()),
        };

        for file in files {
            info!("Processing file: {} ({})", file.name, file.mime_type);
            self.observer.on_file_start(&file.name, &file.mime_type);

            let status = match self.normalizer.normalize(file).await {
                Ok(_) if FileKind::classify(&file.mime_type) == FileKind::Unsupported => {
                    self.observer.on_file_skipped(&file.name, &file.mime_type);
                    FileStatus::Skipped
                }
                Ok(images) => {
                    self.observer.on_file_complete(&file.name, images.len());
                    let n = images.len();
                    batch.images.extend(images);
                    FileStatus::Encoded { images: n }
                }
                Err(error) => {
                    warn!("{}", error);
                    self.observer.on_file_error(&file.name, &error.to_string());
                    if self.fail_fast {
                        return Err(PipelineError::BatchAborted(error));
                    }
                    FileStatus::Failed { error }
                }
            };

            batch.reports.push(FileReport {
                file_name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                status,
            });
        }

        info!(
            "Encoded batch: {} files → {} images",
            files.len(),
            batch.images.len()
        );
        Ok(batch)
    }
}
