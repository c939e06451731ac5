//! Validator verdicts and the logical-failure taxonomy

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Categories of logical failure. Every failing verdict carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Module failed to import, or `parse` is missing or has the wrong signature
    ImportError,
    /// Output columns differ from the schema (set or order)
    SchemaMismatch,
    /// Uncaught exception while the parser ran
    RuntimeError,
    /// Columns match but cell values differ from the expected output
    ValueMismatch,
    /// Execution exceeded the wall-clock budget
    Timeout,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 5] = [
        Self::ImportError,
        Self::SchemaMismatch,
        Self::RuntimeError,
        Self::ValueMismatch,
        Self::Timeout,
    ];

    /// How far a candidate with this failure is from passing (lower is closer).
    pub fn distance(self) -> u8 {
        match self {
            Self::ValueMismatch => 1,
            Self::SchemaMismatch => 2,
            Self::RuntimeError => 3,
            Self::Timeout => 4,
            Self::ImportError => 5,
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImportError => write!(f, "import_error"),
            Self::SchemaMismatch => write!(f, "schema_mismatch"),
            Self::RuntimeError => write!(f, "runtime_error"),
            Self::ValueMismatch => write!(f, "value_mismatch"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A single mismatching cell between parser output and expected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMismatch {
    /// Zero-based row index in the expected output
    pub row: usize,
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// Expected vs observed output columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDiff {
    pub expected: Vec<String>,
    pub observed: Vec<String>,
}

impl ColumnDiff {
    pub fn new(expected: Vec<String>, observed: Vec<String>) -> Self {
        Self { expected, observed }
    }

    /// Expected columns absent from the output, sorted.
    pub fn missing(&self) -> Vec<&str> {
        let observed: BTreeSet<&str> = self.observed.iter().map(String::as_str).collect();
        let expected: BTreeSet<&str> = self.expected.iter().map(String::as_str).collect();
        expected.difference(&observed).copied().collect()
    }

    /// Output columns not in the schema, sorted.
    pub fn unexpected(&self) -> Vec<&str> {
        let observed: BTreeSet<&str> = self.observed.iter().map(String::as_str).collect();
        let expected: BTreeSet<&str> = self.expected.iter().map(String::as_str).collect();
        observed.difference(&expected).copied().collect()
    }

    /// Symmetric difference of the two column sets, sorted.
    pub fn symmetric_difference(&self) -> Vec<&str> {
        let mut all = self.missing();
        all.extend(self.unexpected());
        all.sort_unstable();
        all
    }

    /// Same set of columns, different order (or duplicates).
    pub fn is_order_only(&self) -> bool {
        self.symmetric_difference().is_empty() && self.expected != self.observed
    }
}

/// Structured detail of a failing verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub category: FailureCategory,
    /// Diagnostic text from the validator
    pub message: String,
    /// Mismatching cells, for value mismatches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offending_rows: Option<Vec<RowMismatch>>,
    /// Column comparison, for schema mismatches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<ColumnDiff>,
}

impl Failure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            offending_rows: None,
            columns: None,
        }
    }

    pub fn schema_mismatch(diff: ColumnDiff) -> Self {
        Self::new(
            FailureCategory::SchemaMismatch,
            "output columns differ from the expected schema",
        )
        .with_columns(diff)
    }

    pub fn value_mismatch(message: impl Into<String>, rows: Vec<RowMismatch>) -> Self {
        Self::new(FailureCategory::ValueMismatch, message).with_rows(rows)
    }

    pub fn timeout(budget: Duration) -> Self {
        Self::new(
            FailureCategory::Timeout,
            format!("execution exceeded the {}s time budget", budget.as_secs_f64()),
        )
    }

    /// Fallback for output nothing could be parsed from.
    pub fn unparsed(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let message = if raw.trim().is_empty() {
            "validator produced no diagnostic output".to_string()
        } else {
            raw
        };
        Self::new(FailureCategory::RuntimeError, message)
    }

    pub fn with_rows(mut self, rows: Vec<RowMismatch>) -> Self {
        self.offending_rows = Some(rows);
        self
    }

    pub fn with_columns(mut self, diff: ColumnDiff) -> Self {
        self.columns = Some(diff);
        self
    }

    pub fn offending_row_count(&self) -> usize {
        self.offending_rows.as_ref().map_or(0, Vec::len)
    }
}

/// The validator's judgment on one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(Failure),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Pass => None,
            Self::Fail(failure) => Some(failure),
        }
    }

    pub fn category(&self) -> Option<FailureCategory> {
        self.failure().map(|f| f.category)
    }
}
