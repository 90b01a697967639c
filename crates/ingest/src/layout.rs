use std::path::{Path, PathBuf};

use docprep_core::DocOrdinal;

/// Filesystem layout of pipeline artifacts.
///
/// ```text
/// <output>/
///   images/doc_1_page_0_img_0.png
///   tables/doc_1_page_0_table_0.csv
///   text/doc_1_page_0_chunk_0.txt
/// ```
///
/// File names are unique per (ordinal, page, index), so concurrent workers
/// never write to the same file.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Create the layout, ensuring all artifact directories exist.
    pub fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let layout = Self { root: root.into() };
        std::fs::create_dir_all(layout.images_dir())?;
        std::fs::create_dir_all(layout.tables_dir())?;
        std::fs::create_dir_all(layout.text_dir())?;
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.root.join("tables")
    }

    pub fn text_dir(&self) -> PathBuf {
        self.root.join("text")
    }

    pub fn image_path(&self, ordinal: DocOrdinal, page: usize, index: usize, format: &str) -> PathBuf {
        self.images_dir()
            .join(format!("doc_{ordinal}_page_{page}_img_{index}.{format}"))
    }

    pub fn table_path(&self, ordinal: DocOrdinal, page: usize, index: usize) -> PathBuf {
        self.tables_dir()
            .join(format!("doc_{ordinal}_page_{page}_table_{index}.csv"))
    }

    pub fn chunk_path(&self, ordinal: DocOrdinal, page: usize, index: usize) -> PathBuf {
        self.text_dir()
            .join(format!("doc_{ordinal}_page_{page}_chunk_{index}.txt"))
    }
}
