//! Capability interfaces over the document-decoding and table-detection
//! engines, plus the adapters shipped with the crate.
//!
//! The pipeline only talks to [`ExtractionBackend`], [`DocumentHandle`] and
//! [`TableBackend`]; which engine sits behind them is a wiring decision made
//! by the caller.

mod pdf;
mod tables;
mod text;

pub use pdf::PdfBackend;
pub use tables::{CommandTableBackend, NoTables};
pub use text::TextBackend;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use docprep_core::config::normalize_extension;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to open document: {0}")]
    Open(String),
    #[error("page {page} unavailable: {detail}")]
    Page { page: usize, detail: String },
    #[error("image extraction failed: {0}")]
    Image(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Colorspace of an embedded image, as declared by the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed,
    Unknown,
}

impl ColorSpace {
    /// Map a component count to a colorspace (1 = gray, 3 = rgb, 4 = cmyk).
    pub fn from_components(n: i64) -> Self {
        match n {
            1 => ColorSpace::Gray,
            3 => ColorSpace::Rgb,
            4 => ColorSpace::Cmyk,
            _ => ColorSpace::Unknown,
        }
    }

    pub fn components(self) -> Option<u8> {
        match self {
            ColorSpace::Gray => Some(1),
            ColorSpace::Rgb => Some(3),
            ColorSpace::Cmyk => Some(4),
            ColorSpace::Indexed | ColorSpace::Unknown => None,
        }
    }
}

/// Opaque reference to an image embedded in a page, valid for the handle that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub id: u64,
    pub name: String,
}

/// Encoded image bytes as pulled out of a document.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub colorspace: ColorSpace,
    /// Lowercase file-extension hint for the encoding of `bytes` (`jpeg`, `png`, `jpx`, ...).
    pub extension: String,
}

/// Document-level metadata exposed by a backend. Missing values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub creation_date: Option<String>,
}

/// An open document. Not shared across threads; one worker owns it for the
/// whole page loop.
pub trait DocumentHandle {
    fn path(&self) -> &Path;

    fn page_count(&self) -> usize;

    /// Raw text of a 0-based page.
    fn page_text(&self, page: usize) -> Result<String, BackendError>;

    /// Images embedded in a page, in document order.
    fn page_images(&self, page: usize) -> Result<Vec<ImageRef>, BackendError>;

    fn extract_image(&self, page: usize, image: &ImageRef) -> Result<RawImage, BackendError>;

    fn info(&self) -> DocumentInfo;

    /// Whether table detection makes sense for this document.
    fn supports_tables(&self) -> bool {
        true
    }

    /// Release engine resources. Called exactly once by [`with_document`].
    fn close(&mut self) {}
}

/// Opens documents.
pub trait ExtractionBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, BackendError>;
}

/// Closes the handle when dropped, including while unwinding.
struct OpenDocument(Box<dyn DocumentHandle>);

impl Drop for OpenDocument {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Open `path`, run `f` against the handle and close it on every exit path,
/// a panic inside `f` included.
pub fn with_document<F, R>(
    backend: &dyn ExtractionBackend,
    path: &Path,
    f: F,
) -> Result<R, BackendError>
where
    F: FnOnce(&dyn DocumentHandle) -> R,
{
    let open = OpenDocument(backend.open(path)?);
    Ok(f(open.0.as_ref()))
}

/// Dispatches to a backend by file extension.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    by_extension: HashMap<String, Arc<dyn ExtractionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// PDF through [`PdfBackend`], `txt`/`text`/`md`/`markdown` through [`TextBackend`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(&["pdf"], Arc::new(PdfBackend::new()));
        registry.register(&["txt", "text", "md", "markdown"], Arc::new(TextBackend));
        registry
    }

    pub fn register(&mut self, extensions: &[&str], backend: Arc<dyn ExtractionBackend>) {
        for ext in extensions {
            self.by_extension
                .insert(normalize_extension(ext), Arc::clone(&backend));
        }
    }
}

impl ExtractionBackend for BackendRegistry {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, BackendError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .unwrap_or_default();
        match self.by_extension.get(&ext) {
            Some(backend) => backend.open(path),
            None => Err(BackendError::Open(format!(
                "unsupported file type: {}",
                if ext.is_empty() { "(none)" } else { ext.as_str() }
            ))),
        }
    }
}

// ── Table detection ─────────────────────────────────────────────────

/// Table detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStrategy {
    /// Whitespace-delimited, dense layouts.
    Stream,
    /// Ruled layouts with drawn cell borders.
    Lattice,
}

impl TableStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            TableStrategy::Stream => "stream",
            TableStrategy::Lattice => "lattice",
        }
    }
}

impl std::fmt::Display for TableStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TableRequest {
    pub source: PathBuf,
    /// 0-based page.
    pub page: usize,
    pub strategy: TableStrategy,
    pub detect_vertical_text: bool,
}

/// A candidate table before the accuracy gate.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTable {
    /// Detector confidence, 0-100.
    pub accuracy: f64,
    pub rows: Vec<Vec<String>>,
}

/// Whether a detection failure is worth retrying with the other strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableErrorKind {
    /// The detector itself broke down on this page.
    Fatal,
    /// The page could not be analysed; another strategy will not help.
    Recoverable,
}

#[derive(Debug, Error)]
#[error("{kind:?} table backend failure: {detail}")]
pub struct TableBackendError {
    pub kind: TableErrorKind,
    pub detail: String,
}

impl TableBackendError {
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            kind: TableErrorKind::Fatal,
            detail: detail.into(),
        }
    }

    pub fn recoverable(detail: impl Into<String>) -> Self {
        Self {
            kind: TableErrorKind::Recoverable,
            detail: detail.into(),
        }
    }
}

pub trait TableBackend: Send + Sync {
    fn detect(&self, request: &TableRequest) -> Result<Vec<DetectedTable>, TableBackendError>;
}
