//! docprep: extract text, tables and images from a document directory and
//! emit embedding-ready chunk and image lists.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use docprep_core::config::load_dotenv;
use docprep_core::{DocumentRecord, ImageSize, PipelineConfig};
use docprep_ingest::Pipeline;

/// Document extraction and chunking pipeline.
///
/// Settings come from an optional TOML file, then `DOCPREP_*` environment
/// variables, then these flags.
#[derive(Parser, Debug)]
#[command(name = "docprep", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "DOCPREP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to scan for documents.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output root for images/, tables/, text/ and the JSON summaries.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Worker threads, one document each.
    #[arg(long)]
    workers: Option<usize>,

    /// Minimum image size, e.g. 224x224.
    #[arg(long, value_parser = parse_image_size)]
    min_image_size: Option<ImageSize>,

    /// Maximum characters per chunk before overlap.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Characters carried over from the previous chunk.
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Also write every chunk to text/.
    #[arg(long)]
    persist_chunks: bool,

    /// External table detector, e.g. "python3 detect_tables.py".
    #[arg(long)]
    table_command: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(v) = &self.input {
            config.input_directory = v.clone();
        }
        if let Some(v) = &self.output {
            config.output_directory = v.clone();
        }
        if let Some(v) = self.workers {
            config.max_workers = v;
        }
        if let Some(v) = self.min_image_size {
            config.min_image_size = v;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = v;
        }
        if let Some(v) = self.chunk_overlap {
            config.chunk_overlap = v;
        }
        if self.persist_chunks {
            config.persist_chunks = true;
        }
        if let Some(v) = &self.table_command {
            let parts: Vec<String> = v.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                config.table_command = Some(parts);
            }
        }
    }
}

/// File and environment first, then flags; validated once at the end.
fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config =
        PipelineConfig::resolve(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn parse_image_size(s: &str) -> Result<ImageSize, String> {
    ImageSize::parse(s).ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))
}

fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = resolve_config(&cli)?;
    config.log_summary();

    let pipeline = Pipeline::from_config(config).context("failed to set up pipeline")?;
    let documents = pipeline.run().context("pipeline run failed")?;
    print_summary(&documents);

    let preprocessor = pipeline.preprocessor();
    let chunks = preprocessor.prepare_text(&documents);
    let images = preprocessor.prepare_images(&documents);

    let root = pipeline.layout().root();
    write_json(&root.join("text_chunks.json"), &chunks)?;
    write_json(&root.join("images.json"), &images)?;

    info!(
        documents = documents.len(),
        chunks = chunks.len(),
        images = images.len(),
        output = %root.display(),
        "Done"
    );
    Ok(())
}

fn print_summary(documents: &[DocumentRecord]) {
    for doc in documents {
        println!("{}:", doc.source_path.display());
        match &doc.error {
            Some(e) => println!("  error: {e}"),
            None => println!(
                "  pages: {}, images: {}, tables: {}",
                doc.pages.len(),
                doc.image_count(),
                doc.table_count()
            ),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
