//! In-memory backends for unit tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbImage};

use docprep_core::PipelineConfig;

use crate::backend::{
    BackendError, ColorSpace, DocumentHandle, DocumentInfo, ExtractionBackend, ImageRef, NoTables,
    RawImage, TableBackend,
};
use crate::document::{DocumentProcessor, ImageNormalizer, PageProcessor, TableCoordinator};
use crate::layout::OutputLayout;

/// RGB PNG filled with one shade, so different shades give different bytes.
pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([shade, shade, 0]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Document processor over `backend` with default config and no tables.
pub fn processor(out: &Path, backend: Arc<dyn ExtractionBackend>) -> DocumentProcessor {
    processor_with_tables(out, backend, Arc::new(NoTables))
}

pub fn processor_with_tables(
    out: &Path,
    backend: Arc<dyn ExtractionBackend>,
    tables: Arc<dyn TableBackend>,
) -> DocumentProcessor {
    let config = PipelineConfig::default();
    let layout = OutputLayout::create(out).unwrap();
    let pages = PageProcessor::new(
        ImageNormalizer::from_config(layout.clone(), &config),
        TableCoordinator::new(tables, layout, config.table_accuracy_threshold),
    );
    DocumentProcessor::new(backend, pages)
}

#[derive(Clone, Default)]
pub struct FakePage {
    /// `None` makes `page_text` fail.
    text: Option<String>,
    /// `None` makes `extract_image` fail for that slot.
    images: Vec<Option<Vec<u8>>>,
    panics: bool,
}

impl FakePage {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self::default()
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn image_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.images.push(Some(bytes));
        self
    }

    pub fn broken_image(mut self) -> Self {
        self.images.push(None);
        self
    }
}

#[derive(Clone, Default)]
pub struct FakeDoc {
    pages: Vec<FakePage>,
    info: DocumentInfo,
}

impl FakeDoc {
    pub fn new(pages: Vec<FakePage>) -> Self {
        Self {
            pages,
            info: DocumentInfo::default(),
        }
    }

    pub fn titled(mut self, title: &str, author: &str) -> Self {
        self.info.title = Some(title.to_string());
        self.info.author = Some(author.to_string());
        self
    }
}

/// Serves [`FakeDoc`]s by path; unknown paths fail to open.
#[derive(Clone, Default)]
pub struct FakeBackend {
    docs: HashMap<PathBuf, FakeDoc>,
    text_reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc(mut self, path: impl Into<PathBuf>, doc: FakeDoc) -> Self {
        self.docs.insert(path.into(), doc);
        self
    }

    pub fn text_reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.text_reads)
    }

    pub fn closes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl ExtractionBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, BackendError> {
        let doc = self
            .docs
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::Open(format!("no such document: {}", path.display())))?;
        Ok(Box::new(FakeHandle {
            path: path.to_path_buf(),
            doc,
            text_reads: Arc::clone(&self.text_reads),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct FakeHandle {
    path: PathBuf,
    doc: FakeDoc,
    text_reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeHandle {
    fn page(&self, page: usize) -> Result<&FakePage, BackendError> {
        self.doc.pages.get(page).ok_or_else(|| BackendError::Page {
            page,
            detail: "out of range".into(),
        })
    }
}

impl DocumentHandle for FakeHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.doc.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, BackendError> {
        self.text_reads.fetch_add(1, Ordering::SeqCst);
        let p = self.page(page)?;
        if p.panics {
            panic!("backend crashed on page {page}");
        }
        p.text.clone().ok_or_else(|| BackendError::Page {
            page,
            detail: "text layer unreadable".into(),
        })
    }

    fn page_images(&self, page: usize) -> Result<Vec<ImageRef>, BackendError> {
        Ok((0..self.page(page)?.images.len())
            .map(|i| ImageRef {
                id: i as u64,
                name: format!("Im{i}"),
            })
            .collect())
    }

    fn extract_image(&self, page: usize, image: &ImageRef) -> Result<RawImage, BackendError> {
        let bytes = self
            .page(page)?
            .images
            .get(image.id as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| BackendError::Image(format!("{} is corrupt", image.name)))?;
        Ok(RawImage {
            bytes,
            colorspace: ColorSpace::Rgb,
            extension: "png".to_string(),
        })
    }

    fn info(&self) -> DocumentInfo {
        self.doc.info.clone()
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
