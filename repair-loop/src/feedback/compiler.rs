//! Failure → correction directive compilation
//!
//! Pure and deterministic: the same `Failure` always compiles to the same
//! `FeedbackDirective`, byte for byte. No model call happens here.

use crate::feedback::diagnostics::innermost_error;
use crate::verdict::{Failure, FailureCategory, RowMismatch};
use serde::{Deserialize, Serialize};

/// Marker appended to excerpts cut at the character budget
pub const TRUNCATION_MARKER: &str = " ...[truncated]";

const IMPORT_HINT: &str = "define a module-level function `parse(pdf_path: str) -> pd.DataFrame` \
and import every library it uses (pandas as pd, pdfplumber) at the top of the file";

const RUNTIME_HINT: &str = "guard the failing operation shown above; check table/row shapes \
before indexing and convert cell text to numbers only after cleaning it";

const VALUE_HINT: &str = "correct the cell values to match the expected output: numeric columns \
must be float (strip separators, empty cells as NaN) and dates must keep the sample's format";

const TIMEOUT_HINT: &str = "the parser must finish quickly without waiting for input; avoid \
unbounded loops and re-opening the PDF per row";

/// Budgets applied when compiling directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Maximum characters of diagnostic text kept in an excerpt
    pub excerpt_max_chars: usize,
    /// Maximum mismatching rows shown for value mismatches
    pub max_sample_rows: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            excerpt_max_chars: 600,
            max_sample_rows: 3,
        }
    }
}

/// Correction instruction injected into the next generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackDirective {
    pub category: FailureCategory,
    /// Bounded excerpt of the failure evidence
    pub excerpt: String,
    /// Short fixed-template correction instruction
    pub hint: String,
}

impl FeedbackDirective {
    /// Format for the generation prompt
    pub fn format_for_prompt(&self) -> String {
        format!(
            "Category: {}\nDetails:\n{}\nFix: {}",
            self.category, self.excerpt, self.hint
        )
    }
}

/// Deterministic feedback compiler
#[derive(Debug, Clone, Default)]
pub struct FeedbackCompiler {
    config: FeedbackConfig,
}

impl FeedbackCompiler {
    pub fn new(config: FeedbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Compile a failing verdict into a directive.
    pub fn compile(&self, failure: &Failure) -> FeedbackDirective {
        let (excerpt, hint) = match failure.category {
            FailureCategory::ImportError => (
                self.truncate(innermost_error(&failure.message)),
                IMPORT_HINT.to_string(),
            ),
            FailureCategory::SchemaMismatch => self.schema_feedback(failure),
            FailureCategory::RuntimeError => (
                self.truncate(innermost_error(&failure.message)),
                RUNTIME_HINT.to_string(),
            ),
            FailureCategory::ValueMismatch => (self.value_excerpt(failure), VALUE_HINT.to_string()),
            FailureCategory::Timeout => (self.truncate(&failure.message), TIMEOUT_HINT.to_string()),
        };

        FeedbackDirective {
            category: failure.category,
            excerpt,
            hint,
        }
    }

    fn schema_feedback(&self, failure: &Failure) -> (String, String) {
        let Some(diff) = &failure.columns else {
            return (
                self.truncate(&failure.message),
                "rename/reorder output columns to exactly match the expected schema".to_string(),
            );
        };

        let mut excerpt = String::new();
        let missing = diff.missing();
        let unexpected = diff.unexpected();
        if !missing.is_empty() {
            excerpt.push_str(&format!("missing columns: {}\n", missing.join(", ")));
        }
        if !unexpected.is_empty() {
            excerpt.push_str(&format!("unexpected columns: {}\n", unexpected.join(", ")));
        }
        if diff.is_order_only() {
            excerpt.push_str("columns are present but in the wrong order\n");
        }
        excerpt.push_str(&format!("observed order: {}", diff.observed.join(", ")));

        let hint = format!(
            "rename/reorder output columns to exactly match: {}",
            diff.expected.join(", ")
        );

        (self.truncate(&excerpt), hint)
    }

    fn value_excerpt(&self, failure: &Failure) -> String {
        let rows: &[RowMismatch] = failure.offending_rows.as_deref().unwrap_or(&[]);
        if rows.is_empty() {
            return self.truncate(&failure.message);
        }

        let shown = rows.len().min(self.config.max_sample_rows);
        let mut excerpt = format!(
            "{}\n{} mismatching cell(s), first {}:\n",
            first_line(&failure.message),
            rows.len(),
            shown
        );
        for row in &rows[..shown] {
            excerpt.push_str(&format!(
                "row {}, column '{}': expected {:?}, got {:?}\n",
                row.row, row.column, row.expected, row.actual
            ));
        }

        self.truncate(excerpt.trim_end())
    }

    /// Cut to the character budget on a char boundary.
    fn truncate(&self, text: &str) -> String {
        let text = text.trim();
        let max = self.config.excerpt_max_chars;
        match text.char_indices().nth(max) {
            None => text.to_string(),
            Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// Render accumulated directives as the feedback block of a generation prompt.
///
/// The latest directive is shown in full; earlier ones are listed as one-line
/// reminders so the generator does not repeat them. Empty history renders
/// as an empty string.
pub fn render_history(history: &[FeedbackDirective]) -> String {
    let Some((latest, earlier)) = history.split_last() else {
        return String::new();
    };

    let mut out = format!(
        "PREVIOUS ATTEMPT FAILED ({}).\n{}\n",
        latest.category,
        latest.format_for_prompt()
    );

    if !earlier.is_empty() {
        out.push_str("\nEarlier attempts also failed; do not repeat these mistakes:\n");
        for (i, directive) in earlier.iter().enumerate() {
            out.push_str(&format!(
                "- attempt {}: {} ({})\n",
                i + 1,
                directive.category,
                first_line(&directive.excerpt)
            ));
        }
    }

    out
}
