use std::path::PathBuf;

use tracing::{debug, info, warn};

use docprep_core::{DocumentRecord, PipelineConfig};

use super::types::{ImagePrepRecord, TextChunk};
use super::validator::ContentValidator;
use crate::document::chunker::ChunkConfig;
use crate::layout::OutputLayout;

/// Produces the two ordered artifact streams from processed documents.
///
/// Input order does not matter: documents are stable-sorted by ordinal first,
/// and documents that failed are skipped.
#[derive(Debug, Clone)]
pub struct EmbeddingPreprocessor {
    chunking: ChunkConfig,
    validator: ContentValidator,
    /// When set, every chunk is also written under `text/`.
    sink: Option<OutputLayout>,
}

impl EmbeddingPreprocessor {
    pub fn new(chunking: ChunkConfig) -> Self {
        Self {
            chunking,
            validator: ContentValidator,
            sink: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(ChunkConfig::from_config(config))
    }

    /// Persist chunk text into `layout`'s text directory.
    pub fn with_sink(mut self, layout: OutputLayout) -> Self {
        self.sink = Some(layout);
        self
    }

    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        self.chunking.chunk(text)
    }

    pub fn prepare_text(&self, documents: &[DocumentRecord]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for doc in sorted_ok(documents) {
            for page in &doc.pages {
                if !self.validator.validate_text(&page.text) {
                    debug!(ordinal = doc.ordinal, page = page.page_number, "page text too short, skipped");
                    continue;
                }
                for (chunk_index, text) in self.chunk_text(&page.text).into_iter().enumerate() {
                    let file_path = self.persist(doc, page.page_number, chunk_index, &text);
                    chunks.push(TextChunk {
                        text,
                        page_number: page.page_number,
                        chunk_index,
                        document_path: doc.source_path.clone(),
                        metadata: doc.metadata.clone(),
                        file_path,
                    });
                }
            }
        }
        info!(chunks = chunks.len(), "text prepared");
        chunks
    }

    pub fn prepare_images(&self, documents: &[DocumentRecord]) -> Vec<ImagePrepRecord> {
        let validator = self.validator;
        let records: Vec<ImagePrepRecord> = sorted_ok(documents)
            .flat_map(move |doc| {
                doc.pages
                    .iter()
                    .flat_map(|page| page.images.iter())
                    .filter(move |image| validator.validate_image(image))
                    .map(move |image| ImagePrepRecord {
                        image_path: image.storage_path.clone(),
                        page_number: image.page_number,
                        image_index: image.index_on_page,
                        document_path: doc.source_path.clone(),
                        metadata: doc.metadata.clone(),
                        size: (image.width, image.height),
                        format: image.format.clone(),
                    })
            })
            .collect();
        info!(images = records.len(), "images prepared");
        records
    }

    fn persist(
        &self,
        doc: &DocumentRecord,
        page: usize,
        chunk_index: usize,
        text: &str,
    ) -> Option<PathBuf> {
        let layout = self.sink.as_ref()?;
        let path = layout.chunk_path(doc.ordinal, page, chunk_index);
        match std::fs::write(&path, text) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write chunk");
                None
            }
        }
    }
}

/// Successful documents in ascending ordinal order (stable for ties).
fn sorted_ok(documents: &[DocumentRecord]) -> impl Iterator<Item = &DocumentRecord> {
    let mut docs: Vec<&DocumentRecord> = documents.iter().filter(|d| d.is_ok()).collect();
    docs.sort_by_key(|d| d.ordinal);
    docs.into_iter()
}
