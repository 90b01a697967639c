use std::path::PathBuf;

use serde::Serialize;

use docprep_core::Metadata;

/// One chunk of page text, ready for a text embedding model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub page_number: usize,
    /// 0-based position of the chunk within its page.
    pub chunk_index: usize,
    pub document_path: PathBuf,
    pub metadata: Metadata,
    /// Where the chunk was written, when chunk persistence is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// One persisted image, ready for a vision model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImagePrepRecord {
    pub image_path: PathBuf,
    pub page_number: usize,
    pub image_index: usize,
    pub document_path: PathBuf,
    pub metadata: Metadata,
    /// `(width, height)` in pixels.
    pub size: (u32, u32),
    pub format: String,
}
