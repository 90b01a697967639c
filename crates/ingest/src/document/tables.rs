use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use docprep_core::{DocOrdinal, TableRecord};

use crate::backend::{
    DetectedTable, DocumentHandle, TableBackend, TableErrorKind, TableRequest, TableStrategy,
};
use crate::layout::OutputLayout;

/// What happened to one step of table extraction on a page.
#[derive(Debug, Clone, PartialEq)]
pub enum TableExtractionOutcome {
    /// Passed the accuracy gate and was written to disk.
    Accepted(TableRecord),
    /// Scored at or below the threshold; never materialized.
    Rejected { candidate: usize, accuracy: f64 },
    /// The backend could not analyse the page with this strategy.
    BackendFailed {
        strategy: TableStrategy,
        kind: TableErrorKind,
        detail: String,
    },
    /// Accepted by the gate but the CSV could not be written.
    PersistFailed { candidate: usize, detail: String },
}

/// Drives the table backend through the stream-then-lattice fallback and the
/// accuracy gate.
#[derive(Clone)]
pub struct TableCoordinator {
    backend: Arc<dyn TableBackend>,
    layout: OutputLayout,
    threshold: f64,
}

impl TableCoordinator {
    pub fn new(backend: Arc<dyn TableBackend>, layout: OutputLayout, threshold: f64) -> Self {
        Self {
            backend,
            layout,
            threshold,
        }
    }

    /// Accepted tables of a page, in extraction order. Failures and
    /// low-confidence candidates simply produce fewer (or no) records.
    pub fn extract_tables(
        &self,
        handle: &dyn DocumentHandle,
        page_number: usize,
        ordinal: DocOrdinal,
    ) -> Vec<TableRecord> {
        self.extract_outcomes(handle, page_number, ordinal)
            .into_iter()
            .filter_map(|outcome| match outcome {
                TableExtractionOutcome::Accepted(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Every outcome of table extraction on a page, including rejections and
    /// backend failures.
    pub fn extract_outcomes(
        &self,
        handle: &dyn DocumentHandle,
        page_number: usize,
        ordinal: DocOrdinal,
    ) -> Vec<TableExtractionOutcome> {
        let mut outcomes = Vec::new();

        let stream = self.detect(handle.path(), page_number, TableStrategy::Stream);
        let candidates = match stream {
            Ok(tables) => tables,
            Err(failed) => {
                let retry = matches!(
                    failed,
                    TableExtractionOutcome::BackendFailed {
                        kind: TableErrorKind::Fatal,
                        ..
                    }
                );
                outcomes.push(failed);
                if !retry {
                    return outcomes;
                }
                debug!(ordinal, page = page_number, "retrying table extraction with lattice");
                match self.detect(handle.path(), page_number, TableStrategy::Lattice) {
                    Ok(tables) => tables,
                    Err(failed) => {
                        outcomes.push(failed);
                        return outcomes;
                    }
                }
            }
        };

        let mut accepted = 0;
        for (candidate, table) in candidates.into_iter().enumerate() {
            // NaN never passes.
            let passes = table.accuracy > self.threshold;
            if !passes {
                debug!(
                    ordinal,
                    page = page_number,
                    candidate,
                    accuracy = table.accuracy,
                    threshold = self.threshold,
                    "table below accuracy threshold"
                );
                outcomes.push(TableExtractionOutcome::Rejected {
                    candidate,
                    accuracy: table.accuracy,
                });
                continue;
            }

            let path = self.layout.table_path(ordinal, page_number, accepted);
            match write_csv(&path, &table) {
                Ok(()) => {
                    outcomes.push(TableExtractionOutcome::Accepted(TableRecord {
                        storage_path: path,
                        page_number,
                        index_on_page: accepted,
                        accuracy: table.accuracy,
                    }));
                    accepted += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to write table");
                    outcomes.push(TableExtractionOutcome::PersistFailed {
                        candidate,
                        detail: e.to_string(),
                    });
                }
            }
        }
        outcomes
    }

    fn detect(
        &self,
        source: &Path,
        page: usize,
        strategy: TableStrategy,
    ) -> Result<Vec<DetectedTable>, TableExtractionOutcome> {
        let request = TableRequest {
            source: source.to_path_buf(),
            page,
            strategy,
            detect_vertical_text: false,
        };
        self.backend.detect(&request).map_err(|e| {
            warn!(
                path = %source.display(),
                page,
                %strategy,
                kind = ?e.kind,
                detail = %e.detail,
                "Table extraction failed"
            );
            TableExtractionOutcome::BackendFailed {
                strategy,
                kind: e.kind,
                detail: e.detail,
            }
        })
    }
}

/// One CSV per table: every field quoted, no header or index column.
fn write_csv(path: &Path, table: &DetectedTable) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .flexible(true)
        .from_path(path)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
