//! PDF rasterisation: render every page of a PDF to a PNG data URI via pdfium.
//!
//! ## Why a trait?
//!
//! Rendering needs a native pdfium library. Putting it behind
//! [`PageRasterizer`] lets the rest of the pipeline (and its tests) run with
//! any backend that honours the contract: N pages in, N PNG data URIs out, in
//! reading order, or an error naming the failing page.
//!
//! ## Why blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Rasterisers are therefore synchronous; the normaliser runs them inside
//! `tokio::task::spawn_blocking` so Tokio worker threads never stall during
//! CPU-heavy rendering.
//!
//! ## Why scale, not pixel caps?
//!
//! Uploads are statements and invoices printed on A4/Letter. Rendering at a
//! fixed 1.5× of the natural viewport gives every page the same effective
//! resolution (~108 DPI), enough for printed amounts and small print.

use crate::config::DEFAULT_RENDER_SCALE;
use crate::error::RasterError;
use crate::pipeline::encode::encode_png_data_uri;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Converts one PDF byte buffer into one PNG data URI per page.
pub trait PageRasterizer: Send + Sync {
    /// Render all pages in order, calling `on_page(page, total)` after each
    /// page is encoded. `page` is 1-indexed.
    ///
    /// If any page fails the whole document fails; no partial result is
    /// returned.
    fn rasterize_observed(
        &self,
        pdf_bytes: &[u8],
        on_page: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<String>, RasterError>;

    /// Render all pages in order.
    fn rasterize(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, RasterError> {
        self.rasterize_observed(pdf_bytes, &mut |_, _| {})
    }
}

/// pdfium-backed [`PageRasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    scale: f32,
    library_path: Option<PathBuf>,
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self {
            scale: DEFAULT_RENDER_SCALE,
            library_path: None,
        }
    }
}

impl PdfiumRasterizer {
    pub fn new(scale: f32, library_path: Option<PathBuf>) -> Self {
        Self {
            scale,
            library_path,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Bind to pdfium: the configured path first, otherwise the system library.
    ///
    /// A directory path is resolved to the platform library name inside it
    /// (`libpdfium.so`, `libpdfium.dylib` or `pdfium.dll`).
    fn bind(&self) -> Result<Pdfium, RasterError> {
        let bindings = match &self.library_path {
            Some(path) => {
                let lib = resolve_library_path(path);
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RasterError::PdfiumBinding(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

fn resolve_library_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(&path)
    } else {
        path.to_path_buf()
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize_observed(
        &self,
        pdf_bytes: &[u8],
        on_page: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<String>, RasterError> {
        if pdf_bytes.is_empty() {
            return Err(RasterError::DocumentLoad {
                detail: "empty buffer".into(),
            });
        }

        let pdfium = self.bind()?;

        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    RasterError::PasswordRequired
                } else {
                    RasterError::DocumentLoad { detail: err_str }
                }
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.scale);

        let mut uris = Vec::with_capacity(total_pages);

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;

            // The bitmap is dropped at the end of each iteration.
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                RasterError::PageRender {
                    page: page_num,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );

            let uri = encode_png_data_uri(&image).map_err(|e| RasterError::PageRender {
                page: page_num,
                detail: e.to_string(),
            })?;

            uris.push(uri);
            on_page(page_num, total_pages);
        }

        Ok(uris)
    }
}
