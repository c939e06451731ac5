//! Target description and structural summary
//!
//! Both are built once at run start and only read afterwards.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Semantic type of an output column.
///
/// Numeric columns are always represented as floats by generated parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Date,
    Text,
    Float,
}

impl SemanticType {
    /// pandas dtype the generated parser is expected to produce.
    pub fn pandas_dtype(self) -> &'static str {
        match self {
            Self::Float => "float64",
            Self::Date | Self::Text => "object",
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Date => write!(f, "date"),
            Self::Text => write!(f, "text"),
            Self::Float => write!(f, "float"),
        }
    }
}

/// One column of the target schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub semantic_type: SemanticType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

/// What a generated parser must produce for one target.
///
/// Construction validates the schema and target name, so a `TargetSpec`
/// that exists is always usable without consuming an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    target_name: String,
    schema: Vec<ColumnSpec>,
    sample_input: PathBuf,
    sample_output: PathBuf,
}

impl TargetSpec {
    pub fn new(
        target_name: impl Into<String>,
        schema: Vec<ColumnSpec>,
        sample_input: impl AsRef<Path>,
        sample_output: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let target_name = target_name.into();
        validate_target_name(&target_name)?;

        if schema.is_empty() {
            return Err(ConfigError::EmptySchema {
                target: target_name,
            });
        }

        for (position, column) in schema.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(ConfigError::EmptyColumnName { position });
            }
            if schema[..position].iter().any(|c| c.name == column.name) {
                return Err(ConfigError::DuplicateColumn {
                    name: column.name.clone(),
                });
            }
        }

        Ok(Self {
            target_name,
            schema,
            sample_input: sample_input.as_ref().to_path_buf(),
            sample_output: sample_output.as_ref().to_path_buf(),
        })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn schema(&self) -> &[ColumnSpec] {
        &self.schema
    }

    /// Sample input document (the statement PDF).
    pub fn sample_input(&self) -> &Path {
        &self.sample_input
    }

    /// Expected output for the sample input (CSV).
    pub fn sample_output(&self) -> &Path {
        &self.sample_output
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|c| c.name.as_str()).collect()
    }

    /// Column names joined for display, e.g. `Date, Description, Amount`.
    pub fn ordered_columns(&self) -> String {
        self.column_names().join(", ")
    }
}

/// Target names double as file-name stems, so only `[A-Za-z0-9_-]` is allowed.
fn validate_target_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTargetName {
            name: name.to_string(),
        })
    }
}

/// Compact structural description of the sample document.
///
/// Produced once per run by the summarizer and handed unchanged to every
/// generation attempt. The loop never inspects it beyond [`render`](Self::render).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralSummary {
    /// Number of pages in the document, if known
    pub page_count: Option<usize>,
    /// Free-form layout observations ("2 tables on page 1", ...)
    #[serde(default)]
    pub layout_hints: Vec<String>,
    /// Leading text of the first page
    #[serde(default)]
    pub text_excerpt: String,
    /// Header candidates seen in extracted tables
    #[serde(default)]
    pub column_candidates: Vec<String>,
    /// A few table rows as extracted from the document
    #[serde(default)]
    pub sample_rows: Vec<Vec<String>>,
    /// A few rows of the expected output, for the generator's reference
    #[serde(default)]
    pub expected_rows: Vec<Vec<String>>,
}

impl StructuralSummary {
    /// Summary carrying only free text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text_excerpt: text.into(),
            ..Default::default()
        }
    }

    pub fn with_expected_rows(mut self, rows: Vec<Vec<String>>) -> Self {
        self.expected_rows = rows;
        self
    }

    /// Render as a prompt section.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(pages) = self.page_count {
            out.push_str(&format!("- Pages: {}\n", pages));
        }
        for hint in &self.layout_hints {
            out.push_str(&format!("- {}\n", hint));
        }
        if !self.column_candidates.is_empty() {
            out.push_str(&format!(
                "- Table header candidates: {}\n",
                self.column_candidates.join(" | ")
            ));
        }
        if !self.text_excerpt.is_empty() {
            out.push_str("- Sample text from first page:\n");
            out.push_str(&self.text_excerpt);
            out.push('\n');
        }
        if !self.sample_rows.is_empty() {
            out.push_str("- Sample table rows:\n");
            for row in &self.sample_rows {
                out.push_str(&format!("  {}\n", row.join(" | ")));
            }
        }
        if !self.expected_rows.is_empty() {
            out.push_str("- Expected output rows:\n");
            for row in &self.expected_rows {
                out.push_str(&format!("  {}\n", row.join(" | ")));
            }
        }

        out
    }
}
