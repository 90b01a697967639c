pub mod chunker;
mod images;
mod page;
mod tables;

pub use images::{content_hash, ImageNormalizer};
pub use page::PageProcessor;
pub use tables::{TableCoordinator, TableExtractionOutcome};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, debug_span, error};

use docprep_core::{DocOrdinal, DocumentRecord, Metadata, MetadataValue, PageRecord};

use crate::backend::{with_document, BackendError, DocumentHandle, ExtractionBackend};

/// Reading a page's text failed. Ends processing of the whole document.
#[derive(Debug, Error)]
#[error("page {page}: {source}")]
pub struct PageProcessingError {
    pub page: usize,
    pub source: BackendError,
}

/// Runs every page of one document through the [`PageProcessor`].
#[derive(Clone)]
pub struct DocumentProcessor {
    backend: Arc<dyn ExtractionBackend>,
    pages: PageProcessor,
}

impl DocumentProcessor {
    pub fn new(backend: Arc<dyn ExtractionBackend>, pages: PageProcessor) -> Self {
        Self { backend, pages }
    }

    /// Process one document. Never fails: an open failure or a page whose
    /// text cannot be read is reported through [`DocumentRecord::error`].
    pub fn process_document(&self, path: &Path, ordinal: DocOrdinal) -> DocumentRecord {
        let span = debug_span!("document", ordinal, path = %path.display());
        let _guard = span.enter();
        let start = Instant::now();
        let outcome = with_document(self.backend.as_ref(), path, |handle| {
            let metadata = collect_metadata(handle);
            (self.process_pages(handle, ordinal), metadata)
        });

        let record = match outcome {
            Ok((Ok(pages), metadata)) => {
                DocumentRecord::succeeded(path.to_path_buf(), ordinal, pages, metadata)
            }
            Ok((Err(e), _)) => {
                error!(ordinal, path = %path.display(), error = %e, "Error processing page, document aborted");
                DocumentRecord::failed(path.to_path_buf(), ordinal, e.to_string())
            }
            Err(e) => {
                error!(ordinal, path = %path.display(), error = %e, "Error opening document");
                DocumentRecord::failed(path.to_path_buf(), ordinal, e.to_string())
            }
        };

        debug!(
            ordinal,
            pages = record.pages.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document processed"
        );
        record
    }

    /// Pages in ascending order; the first page error stops the loop.
    fn process_pages(
        &self,
        handle: &dyn DocumentHandle,
        ordinal: DocOrdinal,
    ) -> Result<Vec<PageRecord>, PageProcessingError> {
        (0..handle.page_count())
            .map(|page| self.pages.process_page(handle, page, ordinal))
            .collect()
    }
}

fn collect_metadata(handle: &dyn DocumentHandle) -> Metadata {
    let info = handle.info();
    let mut metadata = Metadata::new();
    metadata.insert("title".into(), info.title.unwrap_or_default().into());
    metadata.insert("author".into(), info.author.unwrap_or_default().into());
    metadata.insert(
        "creation_date".into(),
        info.creation_date.unwrap_or_default().into(),
    );
    metadata.insert(
        "page_count".into(),
        MetadataValue::Integer(handle.page_count() as i64),
    );
    metadata
}
