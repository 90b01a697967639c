use std::path::{Path, PathBuf};

use super::{BackendError, DocumentHandle, DocumentInfo, ExtractionBackend, ImageRef, RawImage};

/// Plain-text and markdown files. Form feeds (`\x0C`) separate pages; files
/// without them are a single page. Text files never carry images.
pub struct TextBackend;

impl ExtractionBackend for TextBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, BackendError> {
        let bytes = std::fs::read(path)?;
        Ok(Box::new(TextHandle::from_bytes(path, &bytes)))
    }
}

struct TextHandle {
    path: PathBuf,
    pages: Vec<String>,
}

impl TextHandle {
    fn from_bytes(path: &Path, bytes: &[u8]) -> Self {
        // Try UTF-8 first, fall back to lossy conversion
        let text = String::from_utf8(bytes.to_vec())
            .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned());
        Self {
            path: path.to_path_buf(),
            pages: text.split('\x0C').map(str::to_string).collect(),
        }
    }
}

impl DocumentHandle for TextHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, BackendError> {
        self.pages.get(page).cloned().ok_or_else(|| BackendError::Page {
            page,
            detail: format!("document has {} pages", self.pages.len()),
        })
    }

    fn page_images(&self, _page: usize) -> Result<Vec<ImageRef>, BackendError> {
        Ok(Vec::new())
    }

    fn extract_image(&self, _page: usize, image: &ImageRef) -> Result<RawImage, BackendError> {
        Err(BackendError::Image(format!(
            "text documents have no image {}",
            image.name
        )))
    }

    fn info(&self) -> DocumentInfo {
        DocumentInfo {
            title: self
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string),
            ..DocumentInfo::default()
        }
    }

    fn supports_tables(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_without_form_feed() {
        let h = TextHandle::from_bytes(Path::new("notes.txt"), b"Hello, world!\nSecond line.");
        assert_eq!(h.page_count(), 1);
        assert_eq!(h.page_text(0).unwrap(), "Hello, world!\nSecond line.");
        assert!(h.page_images(0).unwrap().is_empty());
    }

    #[test]
    fn form_feed_separates_pages() {
        let h = TextHandle::from_bytes(Path::new("book.txt"), b"one\x0Ctwo\x0Cthree");
        assert_eq!(h.page_count(), 3);
        assert_eq!(h.page_text(2).unwrap(), "three");
        assert!(matches!(h.page_text(3), Err(BackendError::Page { page: 3, .. })));
    }

    #[test]
    fn invalid_utf8_is_lossy() {
        let h = TextHandle::from_bytes(Path::new("x.txt"), b"caf\xE9 au lait");
        assert!(h.page_text(0).unwrap().starts_with("caf"));
    }

    #[test]
    fn title_from_file_stem() {
        let h = TextHandle::from_bytes(Path::new("dir/annual-report.md"), b"# Title");
        assert_eq!(h.info().title.as_deref(), Some("annual-report"));
    }
}
