use docprep_core::ImageRecord;

/// Minimum trimmed length, in characters, for page text to be chunked.
pub const MIN_TEXT_CHARS: usize = 10;

/// Content gates applied before anything is handed to an embedding model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentValidator;

impl ContentValidator {
    pub fn validate_text(&self, text: &str) -> bool {
        text.trim().chars().count() >= MIN_TEXT_CHARS
    }

    /// Every image that made it into a record is accepted. Size and
    /// colorspace were already enforced during extraction.
    pub fn validate_image(&self, _image: &ImageRecord) -> bool {
        true
    }
}
