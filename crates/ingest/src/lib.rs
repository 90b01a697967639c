//! Document extraction and chunking pipeline.
//!
//! Documents are discovered under an input directory, processed page by page
//! on a worker pool (text, tables, images), and turned into ordered text
//! chunks and image records for downstream embedding.

pub mod backend;
pub mod document;
pub mod embedding;
pub mod layout;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use layout::OutputLayout;
pub use pipeline::{Pipeline, PipelineError};
