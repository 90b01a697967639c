use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

const ENV_PREFIX: &str = "DOCPREP";

fn env_opt(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{key}"))
        .ok()
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.trim().parse().ok())
}

/// Comma-separated list, lowercased with surrounding dots and spaces removed.
fn env_list(key: &str) -> Option<Vec<String>> {
    env_opt(key).map(|v| {
        v.split(',')
            .map(normalize_extension)
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Lowercase an extension and strip any leading dot (`".PDF"` -> `"pdf"`).
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

// ── Image size ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse `"224x224"` or `"224,224"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.split_once(['x', 'X', ','])?;
        Some(Self::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

// ── Pipeline config ───────────────────────────────────────────

/// Everything the extraction pipeline and the embedding preprocessor need.
///
/// Resolution order: defaults, then an optional TOML file, then `DOCPREP_*`
/// environment variables. The binary applies CLI flags on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_directory: PathBuf,
    pub output_directory: PathBuf,
    /// Lowercase, dot-free extensions of documents to pick up.
    pub supported_document_extensions: Vec<String>,
    pub max_workers: usize,
    pub min_image_size: ImageSize,
    /// Output formats kept as-is; anything else is re-encoded as PNG.
    pub supported_image_formats: Vec<String>,
    /// Tables must score strictly above this (0-100 scale).
    pub table_accuracy_threshold: f64,
    /// Maximum characters per chunk before overlap is added.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Write every chunk to `text/` in addition to returning it.
    pub persist_chunks: bool,
    /// External table detector (program followed by fixed arguments).
    /// When unset, no tables are extracted.
    pub table_command: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_directory: PathBuf::from("data/documents"),
            output_directory: PathBuf::from("data/processed"),
            supported_document_extensions: vec!["pdf".to_string()],
            max_workers: 4,
            min_image_size: ImageSize::default(),
            supported_image_formats: vec!["jpeg".to_string(), "png".to_string(), "jpg".to_string()],
            table_accuracy_threshold: 80.0,
            chunk_size: 512,
            chunk_overlap: 50,
            persist_chunks: false,
            table_command: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, with missing keys taking their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// Defaults overridden by `DOCPREP_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load an optional TOML file and apply environment overrides, without
    /// validating. Callers layering more overrides validate afterwards.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// [`resolve`](Self::resolve), then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::resolve(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `DOCPREP_*` environment variables that are set.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_opt("INPUT_DIR") {
            self.input_directory = PathBuf::from(v);
        }
        if let Some(v) = env_opt("OUTPUT_DIR") {
            self.output_directory = PathBuf::from(v);
        }
        if let Some(v) = env_list("DOCUMENT_EXTENSIONS") {
            self.supported_document_extensions = v;
        }
        if let Some(v) = env_parse("MAX_WORKERS") {
            self.max_workers = v;
        }
        if let Some(v) = env_opt("MIN_IMAGE_SIZE").and_then(|s| ImageSize::parse(&s)) {
            self.min_image_size = v;
        }
        if let Some(v) = env_list("IMAGE_FORMATS") {
            self.supported_image_formats = v;
        }
        if let Some(v) = env_parse("TABLE_ACCURACY_THRESHOLD") {
            self.table_accuracy_threshold = v;
        }
        if let Some(v) = env_parse("CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP") {
            self.chunk_overlap = v;
        }
        if let Some(v) = env_opt("PERSIST_CHUNKS") {
            self.persist_chunks = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_opt("TABLE_COMMAND") {
            let parts: Vec<String> = v.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                self.table_command = Some(parts);
            }
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        for list in [
            &mut self.supported_document_extensions,
            &mut self.supported_image_formats,
        ] {
            *list = list.iter().map(|e| normalize_extension(e)).collect();
            list.retain(|e| !e.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=100.0).contains(&self.table_accuracy_threshold) {
            return Err(ConfigError::Invalid(format!(
                "table_accuracy_threshold must be within 0..=100, got {}",
                self.table_accuracy_threshold
            )));
        }
        if self.supported_document_extensions.is_empty() {
            return Err(ConfigError::Invalid("no supported document extensions".into()));
        }
        if self.supported_image_formats.is_empty() {
            return Err(ConfigError::Invalid("no supported image formats".into()));
        }
        if matches!(&self.table_command, Some(cmd) if cmd.is_empty()) {
            return Err(ConfigError::Invalid("table_command is empty".into()));
        }
        Ok(())
    }

    /// Print the effective configuration for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  input:       {}", self.input_directory.display());
        tracing::info!("  output:      {}", self.output_directory.display());
        tracing::info!("  extensions:  {}", self.supported_document_extensions.join(","));
        tracing::info!("  workers:     {}", self.max_workers);
        tracing::info!(
            "  images:      min={}x{}, formats={}",
            self.min_image_size.width,
            self.min_image_size.height,
            self.supported_image_formats.join(",")
        );
        tracing::info!(
            "  tables:      threshold={}, command={}",
            self.table_accuracy_threshold,
            self.table_command
                .as_ref()
                .map(|c| c.join(" "))
                .unwrap_or_else(|| "(none)".to_string())
        );
        tracing::info!(
            "  chunking:    size={}, overlap={}, persist={}",
            self.chunk_size,
            self.chunk_overlap,
            self.persist_chunks
        );
    }
}
