//! Chunk configuration.

use docprep_core::PipelineConfig;

/// Sizes used when splitting page text, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per segment before overlap is prepended (default: 512).
    pub chunk_size: usize,
    /// Trailing characters copied from the previous chunk (default: 50).
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        super::chunk_text(text, self.chunk_size, self.chunk_overlap)
    }
}
