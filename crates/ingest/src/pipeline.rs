//! Pipeline driver: discovers documents, fans them out over a worker pool and
//! gathers the records back in ordinal order.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

use docprep_core::config::normalize_extension;
use docprep_core::{ConfigError, DocOrdinal, DocumentRecord, PipelineConfig};

use crate::backend::{BackendRegistry, CommandTableBackend, ExtractionBackend, NoTables, TableBackend};
use crate::document::{DocumentProcessor, ImageNormalizer, PageProcessor, TableCoordinator};
use crate::embedding::EmbeddingPreprocessor;
use crate::layout::OutputLayout;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("input directory not found: {0}")]
    InputMissing(PathBuf),

    #[error("output layout: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub struct Pipeline {
    config: PipelineConfig,
    layout: OutputLayout,
    processor: DocumentProcessor,
}

impl Pipeline {
    /// Validate `config` and create the output layout eagerly.
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn ExtractionBackend>,
        tables: Arc<dyn TableBackend>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let layout = OutputLayout::create(&config.output_directory)?;
        let pages = PageProcessor::new(
            ImageNormalizer::from_config(layout.clone(), &config),
            TableCoordinator::new(tables, layout.clone(), config.table_accuracy_threshold),
        );
        Ok(Self {
            processor: DocumentProcessor::new(backend, pages),
            config,
            layout,
        })
    }

    /// Default backends: the built-in registry for documents, and the
    /// configured table command if any.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let tables: Arc<dyn TableBackend> = match config
            .table_command
            .as_deref()
            .and_then(CommandTableBackend::from_command_line)
        {
            Some(cmd) => Arc::new(cmd),
            None => Arc::new(NoTables),
        };
        Self::new(config, Arc::new(BackendRegistry::with_defaults()), tables)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Preprocessor matching this pipeline's chunking settings; persists
    /// chunks into the output layout when `persist_chunks` is on.
    pub fn preprocessor(&self) -> EmbeddingPreprocessor {
        let pre = EmbeddingPreprocessor::from_config(&self.config);
        if self.config.persist_chunks {
            pre.with_sink(self.layout.clone())
        } else {
            pre
        }
    }

    /// Every file under the input directory with an allowed extension,
    /// sorted by path. Position `i` gets ordinal `i + 1`.
    pub fn discover(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let root = &self.config.input_directory;
        if !root.is_dir() {
            return Err(PipelineError::InputMissing(root.clone()));
        }

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.is_supported(p))
            .collect();
        files.sort();
        Ok(files)
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .map(|ext| self.config.supported_document_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Process every discovered document and return the records sorted by
    /// ordinal. Documents whose task panicked are logged and left out.
    pub fn run(&self) -> Result<Vec<DocumentRecord>, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        let _guard = span.enter();

        let start = Instant::now();
        let files = self.discover()?;
        info!(
            "Processing {} documents from {} with {} workers",
            files.len(),
            self.config.input_directory.display(),
            self.config.max_workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers)
            .thread_name(|i| format!("docprep-worker-{i}"))
            .build()?;

        let (tx, rx) = mpsc::channel::<(DocOrdinal, Result<DocumentRecord, String>)>();
        pool.scope(|scope| {
            for (i, path) in files.iter().enumerate() {
                let ordinal = i + 1;
                let tx = tx.clone();
                let processor = &self.processor;
                let run_span = &span;
                scope.spawn(move |_| {
                    let result = process_isolated(processor, run_span, path, ordinal);
                    let _ = tx.send((ordinal, result));
                });
            }
        });
        drop(tx);

        let mut completed = BTreeMap::new();
        let mut dropped = 0usize;
        for (ordinal, result) in rx {
            match result {
                Ok(record) => {
                    completed.insert(ordinal, record);
                }
                Err(reason) => {
                    dropped += 1;
                    let path = files.get(ordinal - 1).map(|p| p.display().to_string());
                    error!(ordinal, path = ?path, reason = %reason, "Document task crashed, omitted from results");
                }
            }
        }

        let records: Vec<DocumentRecord> = completed.into_values().collect();
        let failed = records.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            warn!(failed, "Some documents finished with errors");
        }
        info!(
            documents = records.len(),
            failed,
            dropped,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );
        Ok(records)
    }
}

/// Process one document on a worker thread inside the run's span. A panic is
/// turned into its message.
fn process_isolated(
    processor: &DocumentProcessor,
    run_span: &Span,
    path: &Path,
    ordinal: DocOrdinal,
) -> Result<DocumentRecord, String> {
    let _guard = run_span.enter();
    panic::catch_unwind(AssertUnwindSafe(|| processor.process_document(path, ordinal)))
        .map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DetectedTable, TableBackendError, TableRequest, TableStrategy};
    use crate::testing::{FakeBackend, FakeDoc, FakePage};
    use std::fs;

    struct Dirs {
        _tmp: tempfile::TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    fn dirs(files: &[&str]) -> Dirs {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let output = tmp.path().join("out");
        for f in files {
            let path = input.join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"%PDF").unwrap();
        }
        fs::create_dir_all(&input).unwrap();
        Dirs {
            _tmp: tmp,
            input,
            output,
        }
    }

    fn config(d: &Dirs) -> PipelineConfig {
        PipelineConfig {
            input_directory: d.input.clone(),
            output_directory: d.output.clone(),
            max_workers: 3,
            ..PipelineConfig::default()
        }
    }

    fn text_doc(text: &str) -> FakeDoc {
        FakeDoc::new(vec![FakePage::text(text)])
    }

    #[test]
    fn new_creates_output_layout() {
        let d = dirs(&[]);
        let _p = Pipeline::new(config(&d), Arc::new(FakeBackend::new()), Arc::new(NoTables)).unwrap();
        for sub in ["images", "tables", "text"] {
            assert!(d.output.join(sub).is_dir());
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let d = dirs(&[]);
        let mut c = config(&d);
        c.max_workers = 0;
        let err = Pipeline::new(c, Arc::new(FakeBackend::new()), Arc::new(NoTables)).err();
        assert!(matches!(err, Some(PipelineError::Config(_))));
    }

    #[test]
    fn discovery_is_sorted_recursive_and_case_insensitive() {
        let d = dirs(&["b.pdf", "a.pdf", "nested/c.PDF", "notes.txt"]);
        let p = Pipeline::new(config(&d), Arc::new(FakeBackend::new()), Arc::new(NoTables)).unwrap();
        let found = p.discover().unwrap();
        assert_eq!(
            found,
            vec![
                d.input.join("a.pdf"),
                d.input.join("b.pdf"),
                d.input.join("nested/c.PDF")
            ]
        );
    }

    #[test]
    fn missing_input_directory_is_an_error() {
        let d = dirs(&[]);
        let mut c = config(&d);
        c.input_directory = d.input.join("nope");
        let p = Pipeline::new(c, Arc::new(FakeBackend::new()), Arc::new(NoTables)).unwrap();
        assert!(matches!(p.run(), Err(PipelineError::InputMissing(_))));
    }

    #[test]
    fn ordinals_follow_sorted_paths() {
        let d = dirs(&["b.pdf", "a.pdf"]);
        let backend = FakeBackend::new()
            .with_doc(d.input.join("a.pdf"), text_doc("contents of a"))
            .with_doc(d.input.join("b.pdf"), text_doc("contents of b"));
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(NoTables)).unwrap();
        let records = p.run().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ordinal, 1);
        assert_eq!(records[0].source_path, d.input.join("a.pdf"));
        assert_eq!(records[1].ordinal, 2);
        assert_eq!(records[1].pages[0].text, "contents of b");
    }

    #[test]
    fn crashed_document_is_omitted_without_affecting_siblings() {
        let d = dirs(&["1.pdf", "2.pdf", "3.pdf"]);
        let backend = FakeBackend::new()
            .with_doc(d.input.join("1.pdf"), text_doc("first"))
            .with_doc(d.input.join("2.pdf"), FakeDoc::new(vec![FakePage::panicking()]))
            .with_doc(d.input.join("3.pdf"), text_doc("third"));
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(NoTables)).unwrap();
        let records = p.run().unwrap();

        let ordinals: Vec<_> = records.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![1, 3]);
    }

    #[test]
    fn failed_documents_keep_their_slot() {
        let d = dirs(&["good.pdf", "unreadable.pdf"]);
        let backend = FakeBackend::new().with_doc(d.input.join("good.pdf"), text_doc("fine"));
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(NoTables)).unwrap();
        let records = p.run().unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert_eq!(records[1].ordinal, 2);
        assert!(records[1].error.is_some());
        assert!(records[1].pages.is_empty());
    }

    #[test]
    fn many_documents_come_back_in_order() {
        let names: Vec<String> = (0..20).map(|i| format!("doc{i:02}.pdf")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let d = dirs(&refs);
        let backend = names.iter().fold(FakeBackend::new(), |b, n| {
            b.with_doc(d.input.join(n), text_doc(n))
        });
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(NoTables)).unwrap();
        let records = p.run().unwrap();

        assert_eq!(records.len(), 20);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.ordinal, i + 1);
            assert_eq!(r.pages[0].text, names[i]);
        }
    }

    struct StreamFatalLatticeOk;

    impl TableBackend for StreamFatalLatticeOk {
        fn detect(&self, request: &TableRequest) -> Result<Vec<DetectedTable>, TableBackendError> {
            match request.strategy {
                TableStrategy::Stream => Err(TableBackendError::fatal("stream crashed")),
                TableStrategy::Lattice => Ok(vec![DetectedTable {
                    accuracy: 85.0,
                    rows: vec![vec!["a".into(), "b".into()]],
                }]),
            }
        }
    }

    #[test]
    fn lattice_fallback_result_reaches_the_record() {
        let d = dirs(&["t.pdf"]);
        let backend = FakeBackend::new().with_doc(d.input.join("t.pdf"), text_doc("table page"));
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(StreamFatalLatticeOk)).unwrap();
        let records = p.run().unwrap();

        let tables = &records[0].pages[0].tables;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].accuracy, 85.0);
        assert_eq!(tables[0].storage_path, d.output.join("tables/doc_1_page_0_table_0.csv"));
        assert!(tables[0].storage_path.is_file());
    }

    #[test]
    fn preprocessor_persists_only_when_enabled() {
        let d = dirs(&[]);
        let mut c = config(&d);
        c.persist_chunks = true;
        let p = Pipeline::new(c, Arc::new(FakeBackend::new()), Arc::new(NoTables)).unwrap();
        let doc = DocumentRecord::succeeded(
            PathBuf::from("x.pdf"),
            1,
            vec![docprep_core::PageRecord {
                text: "enough text to keep".into(),
                tables: Vec::new(),
                images: Vec::new(),
                page_number: 0,
            }],
            Default::default(),
        );
        let chunks = p.preprocessor().prepare_text(&[doc]);
        assert!(chunks[0].file_path.as_ref().unwrap().is_file());
    }

    /// Records `(span, parent)` names as spans are created.
    #[derive(Clone, Default)]
    struct SpanParents(Arc<std::sync::Mutex<Vec<(String, Option<String>)>>>);

    impl<S> tracing_subscriber::Layer<S> for SpanParents
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fn on_new_span(
            &self,
            _attrs: &tracing::span::Attributes<'_>,
            id: &tracing::span::Id,
            ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let span = ctx.span(id).unwrap();
            let parent = span.parent().map(|p| p.name().to_string());
            self.0.lock().unwrap().push((span.name().to_string(), parent));
        }
    }

    #[test]
    fn document_span_is_nested_in_run_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let recorded = SpanParents::default();
        let subscriber = tracing_subscriber::registry().with(recorded.clone());
        let d = dirs(&["a.pdf"]);
        let backend = FakeBackend::new().with_doc(d.input.join("a.pdf"), text_doc("text"));
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(NoTables)).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let run_span = info_span!("pipeline");
            let record = process_isolated(&p.processor, &run_span, &d.input.join("a.pdf"), 1);
            assert!(record.unwrap().is_ok());
        });

        let spans = recorded.0.lock().unwrap().clone();
        assert!(spans.contains(&("document".to_string(), Some("pipeline".to_string()))));
    }

    #[test]
    fn isolated_panic_becomes_message() {
        let d = dirs(&["boom.pdf"]);
        let backend = FakeBackend::new()
            .with_doc(d.input.join("boom.pdf"), FakeDoc::new(vec![FakePage::panicking()]));
        let closes = backend.closes();
        let p = Pipeline::new(config(&d), Arc::new(backend), Arc::new(NoTables)).unwrap();

        let result = process_isolated(&p.processor, &Span::none(), &d.input.join("boom.pdf"), 1);
        assert!(result.unwrap_err().contains("backend crashed on page 0"));
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42_u8)), "unknown panic");
    }
}
