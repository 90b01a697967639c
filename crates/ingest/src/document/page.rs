use std::collections::HashSet;

use tracing::warn;

use docprep_core::{DocOrdinal, PageRecord};

use super::images::ImageNormalizer;
use super::tables::TableCoordinator;
use super::PageProcessingError;
use crate::backend::DocumentHandle;

/// Builds one [`PageRecord`] from a page's text, images and tables.
#[derive(Clone)]
pub struct PageProcessor {
    images: ImageNormalizer,
    tables: TableCoordinator,
}

impl PageProcessor {
    pub fn new(images: ImageNormalizer, tables: TableCoordinator) -> Self {
        Self { images, tables }
    }

    /// Only a failure to read the page text is an error; image and table
    /// problems just leave them out of the record.
    pub fn process_page(
        &self,
        handle: &dyn DocumentHandle,
        page_number: usize,
        ordinal: DocOrdinal,
    ) -> Result<PageRecord, PageProcessingError> {
        let text = handle
            .page_text(page_number)
            .map_err(|source| PageProcessingError {
                page: page_number,
                source,
            })?;

        let images = self.extract_images(handle, page_number, ordinal);
        let tables = if handle.supports_tables() {
            self.tables.extract_tables(handle, page_number, ordinal)
        } else {
            Vec::new()
        };

        Ok(PageRecord {
            text,
            tables,
            images,
            page_number,
        })
    }

    fn extract_images(
        &self,
        handle: &dyn DocumentHandle,
        page_number: usize,
        ordinal: DocOrdinal,
    ) -> Vec<docprep_core::ImageRecord> {
        let refs = match handle.page_images(page_number) {
            Ok(refs) => refs,
            Err(e) => {
                warn!(ordinal, page = page_number, error = %e, "Failed to list page images");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (index, image_ref) in refs.iter().enumerate() {
            let raw = match handle.extract_image(page_number, image_ref) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        ordinal,
                        page = page_number,
                        index,
                        error = %e,
                        "Failed to extract image"
                    );
                    continue;
                }
            };
            if let Some(record) = self
                .images
                .normalize(&raw, page_number, index, ordinal, &mut seen)
            {
                records.push(record);
            }
        }
        records
    }
}
