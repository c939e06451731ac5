//! Validator output classification
//!
//! Turns the raw output of a validation run into a `Verdict`. The harness
//! normally prints one structured result line; when it does not (it crashed,
//! was killed, or the candidate broke the interpreter) the stderr text is
//! classified by pattern, falling back to an unparsed runtime error.

use crate::verdict::{ColumnDiff, Failure, FailureCategory, RowMismatch, Verdict};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// Prefix of the structured result line printed by the validation harness
pub const RESULT_MARKER: &str = "@@PARSER_HARNESS@@";

/// Candidate could not be imported or does not expose `parse(pdf_path)`
static IMPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(^(ModuleNotFoundError|ImportError|SyntaxError|IndentationError|TabError)\b|has no attribute 'parse'|parse\(\) (takes|missing|got an unexpected))",
    )
    .unwrap()
});

static TRACEBACK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Traceback \(most recent call last\):").unwrap());

/// `SomeError: message` / `pkg.module.SomeException: message`
static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*(Error|Exception|Exit|Interrupt|Warning))(:.*)?$").unwrap()
});

/// Raw output of one validation run
#[derive(Debug, Clone, Default)]
pub struct HarnessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Run was killed for exceeding its time budget
    pub timed_out: bool,
    /// Budget the run was held to
    pub budget: Duration,
}

/// Structured record printed by the harness after [`RESULT_MARKER`]
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarnessRecord {
    Pass,
    Import {
        message: String,
    },
    Schema {
        expected: Vec<String>,
        observed: Vec<String>,
    },
    Runtime {
        message: String,
        #[serde(default)]
        traceback: Option<String>,
    },
    Values {
        message: String,
        #[serde(default)]
        rows: Vec<RowMismatch>,
    },
    /// The harness could not set itself up (missing pandas, unreadable
    /// expected output). Not a verdict on the candidate.
    HarnessError {
        message: String,
    },
}

impl HarnessRecord {
    /// Verdict for this record, or `None` for a harness self-failure.
    pub fn into_verdict(self) -> Option<Verdict> {
        let failure = match self {
            Self::Pass => return Some(Verdict::Pass),
            Self::HarnessError { .. } => return None,
            Self::Import { message } => Failure::new(FailureCategory::ImportError, message),
            Self::Schema { expected, observed } => {
                Failure::schema_mismatch(ColumnDiff::new(expected, observed))
            }
            Self::Runtime { message, traceback } => Failure::new(
                FailureCategory::RuntimeError,
                traceback.filter(|t| !t.trim().is_empty()).unwrap_or(message),
            ),
            Self::Values { message, rows } => Failure::value_mismatch(message, rows),
        };
        Some(Verdict::Fail(failure))
    }
}

/// Find the last structured record in harness stdout.
pub fn find_record(stdout: &str) -> Option<HarnessRecord> {
    stdout
        .lines()
        .rev()
        .filter_map(|line| line.trim().strip_prefix(RESULT_MARKER))
        .find_map(|payload| serde_json::from_str(payload.trim()).ok())
}

/// Classify a validation run. Total: every input yields a verdict.
///
/// A harness self-failure record is treated like missing output here;
/// validators that want to surface it as an infrastructure error should
/// check [`find_record`] first.
pub fn classify(output: &HarnessOutput) -> Verdict {
    if output.timed_out {
        return Verdict::Fail(Failure::timeout(output.budget));
    }

    if let Some(verdict) = find_record(&output.stdout).and_then(HarnessRecord::into_verdict) {
        return verdict;
    }

    Verdict::Fail(classify_text(&output.stderr, &output.stdout))
}

/// Pattern-based classification of unstructured output
pub fn classify_text(stderr: &str, stdout: &str) -> Failure {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };

    if IMPORT_PATTERN.is_match(text) {
        return Failure::new(FailureCategory::ImportError, innermost_error(text));
    }
    if TRACEBACK_PATTERN.is_match(text) {
        return Failure::new(FailureCategory::RuntimeError, text.trim());
    }

    Failure::unparsed(text.trim())
}

/// The innermost (last raised) exception line of a Python traceback.
///
/// Falls back to the last non-empty line, then to the whole text.
pub fn innermost_error(text: &str) -> &str {
    let lines = || text.lines().map(str::trim).filter(|l| !l.is_empty());

    lines()
        .filter(|line| EXCEPTION_LINE.is_match(line))
        .last()
        .or_else(|| lines().last())
        .unwrap_or(text)
}
