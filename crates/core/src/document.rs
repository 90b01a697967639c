use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 1-based rank of a document in the sorted input set.
pub type DocOrdinal = usize;

/// Document metadata, ordered by key so serialized output is stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key carrying the document ordinal.
pub const ORDINAL_KEY: &str = "document_ordinal";

/// Metadata values are either free text or counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
}

impl MetadataValue {
    /// Extract as string, returning None for integers.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s.as_str()),
            MetadataValue::Integer(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(n) => Some(*n),
            MetadataValue::Text(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Integer(n)
    }
}

/// An image extracted from a page, validated and written to `images/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub storage_path: PathBuf,
    /// 0-based page number.
    pub page_number: usize,
    /// Position of the image in the page's enumeration order.
    pub index_on_page: usize,
    /// Hex SHA-256 of the extracted bytes.
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
    /// Lowercase file extension the image was saved with.
    pub format: String,
}

/// A table that passed the accuracy gate and was written to `tables/` as CSV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRecord {
    pub storage_path: PathBuf,
    pub page_number: usize,
    /// 0-based index among the accepted tables of the page.
    pub index_on_page: usize,
    /// Detector confidence on a 0-100 scale.
    pub accuracy: f64,
}

/// Everything extracted from one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageRecord {
    pub text: String,
    pub tables: Vec<TableRecord>,
    pub images: Vec<ImageRecord>,
    /// 0-based, matching the backend's page ordinal.
    pub page_number: usize,
}

/// Aggregated extraction result for one input document.
///
/// Build through [`DocumentRecord::succeeded`] or [`DocumentRecord::failed`];
/// a failed record never carries pages and only keeps the ordinal in its
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub source_path: PathBuf,
    pub ordinal: DocOrdinal,
    pub pages: Vec<PageRecord>,
    pub metadata: Metadata,
    pub error: Option<String>,
}

impl DocumentRecord {
    pub fn succeeded(
        source_path: PathBuf,
        ordinal: DocOrdinal,
        pages: Vec<PageRecord>,
        mut metadata: Metadata,
    ) -> Self {
        metadata.insert(ORDINAL_KEY.to_string(), MetadataValue::Integer(ordinal as i64));
        Self {
            source_path,
            ordinal,
            pages,
            metadata,
            error: None,
        }
    }

    pub fn failed(source_path: PathBuf, ordinal: DocOrdinal, error: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(ORDINAL_KEY.to_string(), MetadataValue::Integer(ordinal as i64));
        Self {
            source_path,
            ordinal,
            pages: Vec::new(),
            metadata,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn image_count(&self) -> usize {
        self.pages.iter().map(|p| p.images.len()).sum()
    }

    pub fn table_count(&self) -> usize {
        self.pages.iter().map(|p| p.tables.len()).sum()
    }
}
