//! Expected-output analysis
//!
//! The sample CSV defines the schema: header names in order, with each
//! column's semantic type inferred from its values.

use crate::error::AgentError;
use regex::Regex;
use repair_loop::{ColumnSpec, ConfigError, SemanticType, TargetSpec};
use std::path::Path;
use std::sync::LazyLock;

/// Rows of the expected output shown to the generator
pub const PREVIEW_ROWS: usize = 3;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}|\d{4}-\d{2}-\d{2}|\d{1,2}[- ][A-Za-z]{3}[- ]\d{2,4})$",
    )
    .unwrap()
});

/// Schema and preview taken from an expected-output CSV
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedSample {
    pub columns: Vec<ColumnSpec>,
    /// First [`PREVIEW_ROWS`] data rows
    pub preview: Vec<Vec<String>>,
    pub row_count: usize,
}

impl ExpectedSample {
    /// Read and analyze `path`.
    pub fn from_csv(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Err(AgentError::MissingSample {
                path: path.to_path_buf(),
            });
        }
        let csv_err = |source: csv::Error| AgentError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(AgentError::EmptyCsv {
                path: path.to_path_buf(),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(|v| v.trim().to_string()).collect::<Vec<_>>());
        }

        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values: Vec<&str> = rows
                    .iter()
                    .filter_map(|row| row.get(i).map(String::as_str))
                    .collect();
                ColumnSpec::new(name.clone(), infer_type(&values))
            })
            .collect();

        Ok(Self {
            columns,
            preview: rows.iter().take(PREVIEW_ROWS).cloned().collect(),
            row_count: rows.len(),
        })
    }

    /// Build the target description for a run.
    pub fn target_spec(
        &self,
        target: &str,
        sample_input: &Path,
        sample_output: &Path,
    ) -> Result<TargetSpec, ConfigError> {
        TargetSpec::new(target, self.columns.clone(), sample_input, sample_output)
    }

    /// Header plus preview rows, for the structural summary.
    pub fn preview_with_header(&self) -> Vec<Vec<String>> {
        let header = self.columns.iter().map(|c| c.name.clone()).collect();
        std::iter::once(header)
            .chain(self.preview.iter().cloned())
            .collect()
    }
}

fn is_number(value: &str) -> bool {
    let cleaned: String = value.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().is_ok()
}

/// Infer a column's type from its non-empty values.
///
/// Float when every value is numeric, Date when every value looks like a
/// date, Text otherwise (including columns with no values at all).
pub fn infer_type(values: &[&str]) -> SemanticType {
    let present: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        .collect();

    if present.is_empty() {
        return SemanticType::Text;
    }
    if present.iter().all(|v| is_number(v)) {
        SemanticType::Float
    } else if present.iter().all(|v| DATE_PATTERN.is_match(v)) {
        SemanticType::Date
    } else {
        SemanticType::Text
    }
}
