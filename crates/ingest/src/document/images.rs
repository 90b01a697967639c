use std::collections::HashSet;

use image::{ColorType, DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use docprep_core::{DocOrdinal, ImageRecord, ImageSize, PipelineConfig};

use crate::backend::{ColorSpace, RawImage};
use crate::layout::OutputLayout;

const FALLBACK_FORMAT: &str = "png";

/// Validates, deduplicates and persists images pulled out of a page.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    layout: OutputLayout,
    min_size: ImageSize,
    supported_formats: Vec<String>,
}

impl ImageNormalizer {
    pub fn new(layout: OutputLayout, min_size: ImageSize, supported_formats: Vec<String>) -> Self {
        Self {
            layout,
            min_size,
            supported_formats,
        }
    }

    pub fn from_config(layout: OutputLayout, config: &PipelineConfig) -> Self {
        Self::new(
            layout,
            config.min_image_size,
            config.supported_image_formats.clone(),
        )
    }

    /// Turn one extracted image into a record, or `None` when it is a
    /// duplicate on this page, too small, in an unsupported colorspace, or
    /// cannot be decoded or written.
    ///
    /// `seen` holds the content hashes already encountered on the current
    /// page; the caller starts a fresh set for every page.
    pub fn normalize(
        &self,
        raw: &RawImage,
        page_number: usize,
        image_index: usize,
        ordinal: DocOrdinal,
        seen: &mut HashSet<String>,
    ) -> Option<ImageRecord> {
        let hash = content_hash(&raw.bytes);
        if !seen.insert(hash.clone()) {
            debug!(ordinal, page = page_number, index = image_index, "duplicate image skipped");
            return None;
        }

        let img = match image::load_from_memory(&raw.bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!(
                    ordinal,
                    page = page_number,
                    index = image_index,
                    error = %e,
                    "Failed to decode image"
                );
                return None;
            }
        };

        let (width, height) = (img.width(), img.height());
        if width < self.min_size.width || height < self.min_size.height {
            debug!(ordinal, page = page_number, index = image_index, width, height, "image below minimum size");
            return None;
        }
        if !matches!(raw.colorspace, ColorSpace::Gray | ColorSpace::Rgb) {
            debug!(ordinal, page = page_number, index = image_index, colorspace = ?raw.colorspace, "unsupported colorspace");
            return None;
        }

        let (format, image_format) = self.resolve_format(&raw.extension);
        let path = self.layout.image_path(ordinal, page_number, image_index, &format);
        let img = if image_format == ImageFormat::Jpeg {
            jpeg_compatible(img)
        } else {
            img
        };
        if let Err(e) = img.save_with_format(&path, image_format) {
            warn!(path = %path.display(), error = %e, "Failed to write image");
            return None;
        }

        Some(ImageRecord {
            storage_path: path,
            page_number,
            index_on_page: image_index,
            content_hash: hash,
            width,
            height,
            format,
        })
    }

    /// Keep the hinted format when it is allowed and encodable, otherwise PNG.
    fn resolve_format(&self, hint: &str) -> (String, ImageFormat) {
        let hint = hint.trim_start_matches('.').to_lowercase();
        if self.supported_formats.iter().any(|f| *f == hint) {
            if let Some(fmt) = ImageFormat::from_extension(&hint) {
                return (hint, fmt);
            }
        }
        (FALLBACK_FORMAT.to_string(), ImageFormat::Png)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// The JPEG encoder only takes 8-bit gray or RGB without alpha.
fn jpeg_compatible(img: DynamicImage) -> DynamicImage {
    match img.color() {
        ColorType::L8 | ColorType::Rgb8 => img,
        ColorType::La8 | ColorType::L16 | ColorType::La16 => DynamicImage::ImageLuma8(img.to_luma8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}
