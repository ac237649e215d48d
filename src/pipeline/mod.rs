//! Document ingestion stages: uploaded files → ordered image payloads.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a fake rasteriser in tests) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ render ──▶ encode ──▶ batch
//! (path/URL) (per file)   (pdfium)   (data URI) (ordered list + reports)
//! ```
//!
//! 1. [`input`]: read a path, URL or byte buffer into an `UploadedFile`
//! 2. [`normalize`]: route each file by MIME type (rasterise, pass through, skip)
//! 3. [`render`]: rasterise every PDF page; pdfium is not async-safe so
//!    it runs inside `spawn_blocking`
//! 4. [`encode`]: PNG-encode and base64-wrap into data URIs
//! 5. [`batch`]: apply the normaliser to a whole batch in upload order
//!
//! [`postprocess`] is not on the ingestion path; it pulls JSON out of model
//! replies for reporting.

pub mod batch;
pub mod encode;
pub mod input;
pub mod normalize;
pub mod postprocess;
pub mod render;
