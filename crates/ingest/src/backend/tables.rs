use std::process::Command;

use serde::Deserialize;

use super::{DetectedTable, TableBackend, TableBackendError, TableErrorKind, TableRequest};

/// Table backend that never finds anything. Used when no detector is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTables;

impl TableBackend for NoTables {
    fn detect(&self, _request: &TableRequest) -> Result<Vec<DetectedTable>, TableBackendError> {
        Ok(Vec::new())
    }
}

#[derive(Deserialize)]
struct DetectorTable {
    accuracy: f64,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct DetectorError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct DetectorOutput {
    #[serde(default)]
    tables: Vec<DetectorTable>,
    error: Option<DetectorError>,
}

/// Runs an external table detector once per request.
///
/// The program is invoked as
/// `<program> <args..> --pdf <path> --page <1-based> --flavor <stream|lattice> [--no-vertical]`
/// and must print JSON on stdout:
///
/// ```text
/// {"tables": [{"accuracy": 91.3, "rows": [["a", "b"], ["1", "2"]]}]}
/// {"error": {"code": "fatal", "message": "ghostscript crashed"}}
/// ```
///
/// An error with code `fatal` is a [`TableErrorKind::Fatal`]; any other code,
/// a non-zero exit without parseable output, or a program that cannot be
/// started is [`TableErrorKind::Recoverable`].
#[derive(Debug, Clone)]
pub struct CommandTableBackend {
    program: String,
    args: Vec<String>,
}

impl CommandTableBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args..]` list, as stored in the config.
    pub fn from_command_line(parts: &[String]) -> Option<Self> {
        let (program, args) = parts.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl TableBackend for CommandTableBackend {
    fn detect(&self, request: &TableRequest) -> Result<Vec<DetectedTable>, TableBackendError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--pdf")
            .arg(&request.source)
            .arg("--page")
            .arg((request.page + 1).to_string())
            .arg("--flavor")
            .arg(request.strategy.as_str());
        if !request.detect_vertical_text {
            cmd.arg("--no-vertical");
        }

        let output = cmd.output().map_err(|e| {
            TableBackendError::recoverable(format!("failed to run {}: {e}", self.program))
        })?;

        let parsed: Option<DetectorOutput> = serde_json::from_slice(&output.stdout).ok();
        match parsed {
            Some(DetectorOutput {
                error: Some(err), ..
            }) => Err(TableBackendError {
                kind: classify(&err.code),
                detail: format!("{}: {}", err.code, err.message),
            }),
            Some(out) if output.status.success() => Ok(out
                .tables
                .into_iter()
                .map(|t| DetectedTable {
                    accuracy: t.accuracy,
                    rows: t.rows,
                })
                .collect()),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(TableBackendError::recoverable(format!(
                    "table detector exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
        }
    }
}

fn classify(code: &str) -> TableErrorKind {
    if code.eq_ignore_ascii_case("fatal") {
        TableErrorKind::Fatal
    } else {
        TableErrorKind::Recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TableStrategy;
    use std::path::PathBuf;

    fn request(strategy: TableStrategy) -> TableRequest {
        TableRequest {
            source: PathBuf::from("doc.pdf"),
            page: 0,
            strategy,
            detect_vertical_text: false,
        }
    }

    #[test]
    fn no_tables_is_always_empty() {
        assert!(NoTables.detect(&request(TableStrategy::Stream)).unwrap().is_empty());
    }

    #[test]
    fn from_command_line_splits_program() {
        let parts = vec!["uv".to_string(), "run".to_string(), "detect.py".to_string()];
        let backend = CommandTableBackend::from_command_line(&parts).unwrap();
        assert_eq!(backend.program, "uv");
        assert_eq!(backend.args, vec!["run", "detect.py"]);
        assert!(CommandTableBackend::from_command_line(&[]).is_none());
    }

    #[test]
    fn missing_program_is_recoverable() {
        let backend = CommandTableBackend::new("docprep-no-such-detector-binary", Vec::new());
        let err = backend.detect(&request(TableStrategy::Stream)).unwrap_err();
        assert_eq!(err.kind, TableErrorKind::Recoverable);
    }

    #[test]
    fn fatal_code_is_classified() {
        assert_eq!(classify("fatal"), TableErrorKind::Fatal);
        assert_eq!(classify("FATAL"), TableErrorKind::Fatal);
        assert_eq!(classify("no_text"), TableErrorKind::Recoverable);
    }

    #[test]
    fn parses_detector_output() {
        let out: DetectorOutput = serde_json::from_str(
            r#"{"tables": [{"accuracy": 91.5, "rows": [["a", "b"]]}]}"#,
        )
        .unwrap();
        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].accuracy, 91.5);
        assert!(out.error.is_none());

        let out: DetectorOutput =
            serde_json::from_str(r#"{"error": {"code": "fatal", "message": "boom"}}"#).unwrap();
        assert!(out.tables.is_empty());
        assert_eq!(out.error.unwrap().code, "fatal");
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_detector_through_the_shell() {
        let script = r#"echo '{"tables": [{"accuracy": 88.0, "rows": [["x"]]}]}'"#;
        let backend = CommandTableBackend::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "detector".to_string()],
        );
        let tables = backend.detect(&request(TableStrategy::Lattice)).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows, vec![vec!["x".to_string()]]);
    }

    #[cfg(unix)]
    #[test]
    fn detector_reported_fatal_error() {
        let script = r#"echo '{"error": {"code": "fatal", "message": "ghostscript"}}'; exit 3"#;
        let backend = CommandTableBackend::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "detector".to_string()],
        );
        let err = backend.detect(&request(TableStrategy::Stream)).unwrap_err();
        assert_eq!(err.kind, TableErrorKind::Fatal);
        assert!(err.detail.contains("ghostscript"));
    }
}
