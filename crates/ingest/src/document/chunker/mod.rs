//! Character-based chunking of page text into overlapping embedding units.
//!
//! Text is word-wrapped into segments of at most `chunk_size` characters,
//! then every segment after the first is prefixed with the last
//! `chunk_overlap` characters of the chunk before it.

mod helpers;
mod types;

pub use types::ChunkConfig;

use helpers::{splice_overlap, wrap_words};

/// Split `text` into ordered chunks.
///
/// Blank text yields no chunks. Text that already fits in `chunk_size`
/// characters is returned as a single chunk, unchanged.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }
    splice_overlap(wrap_words(text, chunk_size), chunk_overlap)
}
