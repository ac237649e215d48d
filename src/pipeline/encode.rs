//! Image encoding: raster images → base64 data URIs wrapped in [`ImagePayload`].
//!
//! Provider APIs accept images as base64 embedded in the JSON request body.
//! OpenAI takes the full `data:<mime>;base64,<payload>` URI, Gemini takes the
//! MIME type and the bare base64 separately, so the payload keeps the URI and
//! exposes both halves.
//!
//! Rendered PDF pages are encoded as PNG: lossless compression keeps printed
//! figures and small table text crisp, which matters far more for extraction
//! accuracy than request size.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// One image destined for an extraction request.
///
/// Invariant: `encoding` is `data:<image mime>;base64,<payload>` where the
/// MIME type is PNG for rendered pages or the upload's own image type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Name of the uploaded file this image came from.
    pub source_file_name: String,
    /// 1-indexed page within the source file (always 1 for image uploads).
    pub page: usize,
    /// The data URI.
    pub encoding: String,
}

impl ImagePayload {
    pub fn new(source_file_name: impl Into<String>, page: usize, encoding: String) -> Self {
        Self {
            source_file_name: source_file_name.into(),
            page,
            encoding,
        }
    }

    /// MIME type from the data-URI prefix, e.g. `image/png`.
    pub fn mime_type(&self) -> &str {
        split_data_uri(&self.encoding).map(|(m, _)| m).unwrap_or("")
    }

    /// The bare base64 payload after the comma.
    pub fn base64_data(&self) -> &str {
        split_data_uri(&self.encoding).map(|(_, d)| d).unwrap_or("")
    }

    /// Convert to the image type used by the routed `edgequake-llm` backend.
    ///
    /// `detail: "high"` asks GPT-4-class models for the full tile budget; fine
    /// print on statements is lost at "low".
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64_data().to_string(), self.mime_type()).with_detail("high")
    }
}

/// Build a `data:<mime>;base64,<payload>` URI from raw bytes.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Encode a rendered page as a PNG data URI.
pub fn encode_png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let uri = data_uri("image/png", &buf);
    debug!("Encoded page → {} bytes data URI", uri.len());
    Ok(uri)
}

/// Split a base64 data URI into `(mime_type, payload)`.
pub fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    Some((mime, payload))
}
