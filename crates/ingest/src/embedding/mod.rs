//! Turns processed documents into embedding-ready text chunks and image
//! records.

pub mod preprocessor;
pub mod types;
pub mod validator;

pub use preprocessor::EmbeddingPreprocessor;
pub use types::{ImagePrepRecord, TextChunk};
pub use validator::ContentValidator;
