//! Input resolution: turn a user-supplied path, URL or byte buffer into an
//! [`UploadedFile`].
//!
//! ## Why read everything into memory?
//!
//! Uploaded documents are small (statements, invoices, receipts) and every
//! later stage wants bytes: pdfium loads from a byte slice, images are base64
//! encoded as-is. Holding the bytes in the `UploadedFile` means the pipeline
//! never touches the file system again after this point, and URL inputs need
//! no temporary directory.
//!
//! The MIME type decides how a file is normalised, so it is resolved here:
//! an explicit type wins, then the file extension, then the magic bytes.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// MIME type used when neither extension nor content identifies the file.
pub const UNKNOWN_MIME: &str = "application/octet-stream";

/// One user-submitted document. Immutable once read.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub raw_bytes: Vec<u8>,
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("raw_bytes", &format_args!("<{} bytes>", self.raw_bytes.len()))
            .finish()
    }
}

impl UploadedFile {
    /// Wrap bytes whose MIME type is already known (e.g. from an upload form).
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        raw_bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            raw_bytes: raw_bytes.into(),
        }
    }

    /// Wrap bytes and detect the MIME type from the name and content.
    pub fn detect(name: impl Into<String>, raw_bytes: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let raw_bytes = raw_bytes.into();
        let mime_type = detect_mime(&name, &raw_bytes).to_string();
        Self {
            name,
            mime_type,
            raw_bytes,
        }
    }

    /// Read a local file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PipelineError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let file = Self::detect(name, bytes);
        debug!(
            "Read {} ({}, {} bytes)",
            path.display(),
            file.mime_type,
            file.raw_bytes.len()
        );
        Ok(file)
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to an [`UploadedFile`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<UploadedFile, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        UploadedFile::from_path(PathBuf::from(input)).await
    }
}

/// Detect a MIME type from the file extension, falling back to magic bytes.
pub fn detect_mime(name: &str, bytes: &[u8]) -> &'static str {
    mime_from_extension(name)
        .or_else(|| sniff_mime(bytes))
        .unwrap_or(UNKNOWN_MIME)
}

fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<UploadedFile, PipelineError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let header_mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .filter(|m| m.starts_with("image/") || m.contains("pdf"));

    let name = filename_from_url(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let file = match header_mime {
        Some(mime) => UploadedFile::from_bytes(name, mime, bytes.to_vec()),
        None => UploadedFile::detect(name, bytes.to_vec()),
    };

    info!(
        "Downloaded {} ({}, {} bytes)",
        file.name,
        file.mime_type,
        file.raw_bytes.len()
    );
    Ok(file)
}

/// Extract a reasonable filename from the URL path.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}
