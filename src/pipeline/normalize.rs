//! Per-file normalisation: one [`UploadedFile`] → ordered [`ImagePayload`]s.
//!
//! | MIME type                               | Result                          |
//! |-----------------------------------------|---------------------------------|
//! | `application/pdf`, `application/x-pdf`  | one PNG payload per page        |
//! | `image/*`                               | one payload, original MIME type |
//! | anything else                           | empty, logged and skipped       |

use crate::error::{FileError, RasterError};
use crate::observer::{NoopObserver, SharedObserver};
use crate::pipeline::encode::{data_uri, ImagePayload};
use crate::pipeline::input::UploadedFile;
use crate::pipeline::render::PageRasterizer;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a file is turned into images, decided by its MIME type alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
    Unsupported,
}

impl FileKind {
    /// Classify a MIME type (case-insensitive, parameters ignored).
    pub fn classify(mime_type: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => FileKind::Pdf,
            m if m.starts_with("image/") && m.len() > "image/".len() => FileKind::Image,
            _ => FileKind::Unsupported,
        }
    }
}

/// Turns one uploaded file into its image payloads.
#[derive(Clone)]
pub struct FileNormalizer {
    rasterizer: Arc<dyn PageRasterizer>,
    observer: SharedObserver,
}

impl FileNormalizer {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            rasterizer,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Normalise one file.
    ///
    /// Unsupported types return `Ok(vec![])` after a warning; only a PDF that
    /// cannot be rasterised is an error.
    pub async fn normalize(&self, file: &UploadedFile) -> Result<Vec<ImagePayload>, FileError> {
        match FileKind::classify(&file.mime_type) {
            FileKind::Pdf => self.normalize_pdf(file).await,
            FileKind::Image => {
                debug!("{} is an image ({})", file.name, file.mime_type);
                Ok(vec![ImagePayload::new(
                    &file.name,
                    1,
                    data_uri(&file.mime_type, &file.raw_bytes),
                )])
            }
            FileKind::Unsupported => {
                warn!(
                    "Unsupported file type '{}' for {}; skipping",
                    file.mime_type, file.name
                );
                Ok(Vec::new())
            }
        }
    }

    async fn normalize_pdf(&self, file: &UploadedFile) -> Result<Vec<ImagePayload>, FileError> {
        debug!("{} is a PDF ({} bytes)", file.name, file.raw_bytes.len());

        let rasterizer = Arc::clone(&self.rasterizer);
        let observer = Arc::clone(&self.observer);
        let name = file.name.clone();
        let bytes = file.raw_bytes.clone();

        let uris = tokio::task::spawn_blocking(move || {
            let mut on_page = |page: usize, total: usize| {
                debug!("{}: page {}/{} converted to image", name, page, total);
                observer.on_page_rendered(&name, page, total);
            };
            rasterizer.rasterize_observed(&bytes, &mut on_page)
        })
        .await
        .map_err(|e| RasterError::Internal(format!("Render task panicked: {}", e)))
        .and_then(|r| r)
        .map_err(|source| FileError::Rasterisation {
            file: file.name.clone(),
            source,
        })?;

        Ok(uris
            .into_iter()
            .enumerate()
            .map(|(i, uri)| ImagePayload::new(&file.name, i + 1, uri))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rasteriser that returns one fake PNG URI per byte of input.
    struct CountingRasterizer;

    impl PageRasterizer for CountingRasterizer {
        fn rasterize_observed(
            &self,
            pdf_bytes: &[u8],
            on_page: &mut dyn FnMut(usize, usize),
        ) -> Result<Vec<String>, RasterError> {
            let total = pdf_bytes.len();
            Ok((1..=total)
                .map(|p| {
                    on_page(p, total);
                    format!("data:image/png;base64,cGFnZS{p}")
                })
                .collect())
        }
    }

    struct BrokenRasterizer;

    impl PageRasterizer for BrokenRasterizer {
        fn rasterize_observed(
            &self,
            _pdf_bytes: &[u8],
            _on_page: &mut dyn FnMut(usize, usize),
        ) -> Result<Vec<String>, RasterError> {
            Err(RasterError::PageRender {
                page: 2,
                detail: "boom".into(),
            })
        }
    }

    #[test]
    fn classify_mime_types() {
        assert_eq!(FileKind::classify("application/pdf"), FileKind::Pdf);
        assert_eq!(FileKind::classify("Application/PDF"), FileKind::Pdf);
        assert_eq!(FileKind::classify("application/x-pdf"), FileKind::Pdf);
        assert_eq!(FileKind::classify("image/png"), FileKind::Image);
        assert_eq!(FileKind::classify("image/jpeg; q=1"), FileKind::Image);
        assert_eq!(FileKind::classify("image/"), FileKind::Unsupported);
        assert_eq!(FileKind::classify("text/plain"), FileKind::Unsupported);
        assert_eq!(FileKind::classify(""), FileKind::Unsupported);
    }

    #[tokio::test]
    async fn image_passes_through_with_its_mime() {
        let n = FileNormalizer::new(Arc::new(CountingRasterizer));
        let f = UploadedFile::from_bytes("r.jpg", "image/jpeg", b"jpegbytes".to_vec());
        let out = n.normalize(&f).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].encoding.starts_with("data:image/jpeg;base64,"));
        assert_eq!(out[0].source_file_name, "r.jpg");
    }

    #[tokio::test]
    async fn pdf_yields_one_payload_per_page_in_order() {
        let n = FileNormalizer::new(Arc::new(CountingRasterizer));
        let f = UploadedFile::from_bytes("s.pdf", "application/pdf", vec![0u8; 3]);
        let out = n.normalize(&f).await.unwrap();
        let pages: Vec<usize> = out.iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(out.iter().all(|p| p.mime_type() == "image/png"));
    }

    #[tokio::test]
    async fn unsupported_is_empty_not_error() {
        let n = FileNormalizer::new(Arc::new(CountingRasterizer));
        let f = UploadedFile::from_bytes("notes.txt", "text/plain", b"hi".to_vec());
        assert!(n.normalize(&f).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn raster_failure_names_the_file() {
        let n = FileNormalizer::new(Arc::new(BrokenRasterizer));
        let f = UploadedFile::from_bytes("bad.pdf", "application/pdf", b"%PDF".to_vec());
        let err = n.normalize(&f).await.unwrap_err();
        assert_eq!(err.file_name(), "bad.pdf");
        assert!(err.to_string().contains("page 2"));
    }
}
