//! PDF structural summarizer
//!
//! Runs [`PDF_PROBE`] once per run and condenses its report into a
//! `StructuralSummary`. A failed probe degrades the summary to a single
//! layout hint instead of failing the run; generation can still proceed
//! from the schema and expected rows.

use crate::harness::{marker_payload, PDF_PROBE};
use async_trait::async_trait;
use repair_loop::{CollaboratorError, ColumnSpec, StructuralSummary, Summarizer};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

const COLLABORATOR: &str = "summarizer";

/// Characters of first-page text kept in the summary
const EXCERPT_CHARS: usize = 800;

/// Extracted table rows kept after the header
const SAMPLE_TABLE_ROWS: usize = 3;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ProbeRecord {
    Ok {
        page_count: usize,
        #[serde(default)]
        pages: Vec<ProbePage>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct ProbePage {
    page: usize,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    tables: Vec<Vec<Vec<String>>>,
    #[serde(default)]
    table_count: usize,
}

fn unavailable(reason: &str) -> StructuralSummary {
    StructuralSummary {
        layout_hints: vec![format!("PDF analysis unavailable: {}", reason)],
        ..Default::default()
    }
}

/// Turn probe stdout into a summary. Never fails.
pub fn summary_from_probe(stdout: &str, schema_hint: &[ColumnSpec]) -> StructuralSummary {
    let Some(payload) = marker_payload(stdout) else {
        return unavailable("probe produced no report");
    };
    let record: ProbeRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(e) => return unavailable(&format!("unreadable probe report: {e}")),
    };

    let (page_count, pages) = match record {
        ProbeRecord::Ok { page_count, pages } => (page_count, pages),
        ProbeRecord::Error { message } => return unavailable(&message),
    };

    let mut summary = StructuralSummary {
        page_count: Some(page_count),
        ..Default::default()
    };

    let mut tables_found = 0;
    for page in &pages {
        tables_found += page.table_count;
        summary.layout_hints.push(format!(
            "Page {}: {:.0}x{:.0} pt, {} table(s)",
            page.page, page.width, page.height, page.table_count
        ));
    }
    summary
        .layout_hints
        .push(format!("Tables found in sampled pages: {}", tables_found));

    if let Some(first) = pages.first() {
        summary.text_excerpt = first.text.chars().take(EXCERPT_CHARS).collect();
    }

    if let Some(table) = pages.iter().flat_map(|p| p.tables.iter()).find(|t| !t.is_empty()) {
        let header: Vec<String> = table[0]
            .iter()
            .map(|cell| cell.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|cell| !cell.is_empty())
            .collect();

        let matched = schema_hint
            .iter()
            .filter(|c| header.iter().any(|h| h.eq_ignore_ascii_case(&c.name)))
            .count();
        if !schema_hint.is_empty() {
            summary.layout_hints.push(format!(
                "{} of {} expected column names appear in the first table header",
                matched,
                schema_hint.len()
            ));
        }

        summary.column_candidates = header;
        summary.sample_rows = table.iter().skip(1).take(SAMPLE_TABLE_ROWS).cloned().collect();
    }

    summary
}

/// Summarizer backed by a pdfplumber subprocess
pub struct PdfSummarizer {
    python: String,
}

impl PdfSummarizer {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    async fn run_probe(&self, document: &Path) -> Result<String, String> {
        let workdir = tempfile::Builder::new()
            .prefix("parser-probe-")
            .tempdir()
            .map_err(|e| format!("cannot create scratch dir: {e}"))?;
        let script = workdir.path().join("pdf_probe.py");
        tokio::fs::write(&script, PDF_PROBE)
            .await
            .map_err(|e| format!("cannot write probe: {e}"))?;

        let mut cmd = tokio::process::Command::new(&self.python);
        cmd.arg(&script)
            .arg(document)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Ok(Err(e)) => Err(format!("failed to run {}: {e}", self.python)),
            Err(_) => Err(format!("probe timed out after {}s", PROBE_TIMEOUT.as_secs())),
        }
    }
}

#[async_trait]
impl Summarizer for PdfSummarizer {
    async fn summarize(
        &self,
        document: &Path,
        schema_hint: &[ColumnSpec],
    ) -> Result<StructuralSummary, CollaboratorError> {
        if !document.exists() {
            return Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("sample document not found: {}", document.display()),
            ));
        }

        let summary = match self.run_probe(document).await {
            Ok(stdout) => summary_from_probe(&stdout, schema_hint),
            Err(reason) => {
                warn!(document = %document.display(), error = %reason, "PDF probe failed");
                unavailable(&reason)
            }
        };

        info!(
            document = %document.display(),
            pages = ?summary.page_count,
            header_candidates = summary.column_candidates.len(),
            "Summarized sample document"
        );
        Ok(summary)
    }
}
