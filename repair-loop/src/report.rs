//! Run report
//!
//! A flat, serializable view of a run outcome for humans (`render`) and
//! machines (`--json`). Covers all three ways a run can end.

use crate::attempt::{BestFailing, RunResult, RunStatus};
use crate::error::RunError;
use crate::verdict::FailureCategory;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal outcome as reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Succeeded,
    Exhausted,
    /// Configuration or infrastructure failure
    Aborted,
}

impl FinalStatus {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::Exhausted => 1,
            Self::Aborted => 2,
        }
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// One line of attempt history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLine {
    pub index: u32,
    /// `None` for the passing attempt
    pub category: Option<FailureCategory>,
    /// First line of the failure message
    pub summary: String,
    pub source_path: PathBuf,
    pub source_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub target: String,
    pub status: FinalStatus,
    pub attempts: Vec<AttemptLine>,
    pub final_artifact_path: Option<PathBuf>,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_failing: Option<BestFailingLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Best failing candidate without its source body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestFailingLine {
    pub attempt: u32,
    pub category: FailureCategory,
    pub offending_rows: usize,
}

impl From<&BestFailing> for BestFailingLine {
    fn from(best: &BestFailing) -> Self {
        Self {
            attempt: best.attempt,
            category: best.category,
            offending_rows: best.offending_rows,
        }
    }
}

fn attempt_lines(attempts: &[crate::attempt::Attempt]) -> Vec<AttemptLine> {
    attempts
        .iter()
        .map(|a| AttemptLine {
            index: a.index,
            category: a.category(),
            summary: a
                .verdict
                .failure()
                .map(|f| f.message.lines().next().unwrap_or("").to_string())
                .unwrap_or_else(|| "pass".to_string()),
            source_path: a.source_path.clone(),
            source_digest: a.source_digest.clone(),
        })
        .collect()
}

impl RunReport {
    pub fn from_result(result: &RunResult) -> Self {
        let status = match result.status() {
            RunStatus::Succeeded => FinalStatus::Succeeded,
            RunStatus::Exhausted => FinalStatus::Exhausted,
        };
        Self {
            target: result.target().to_string(),
            status,
            attempts: attempt_lines(result.attempts()),
            final_artifact_path: result.final_artifact_path().cloned(),
            timed_out: result.timed_out(),
            best_failing: result.best_failing().map(BestFailingLine::from),
            error: None,
            duration_ms: result.duration_ms(),
        }
    }

    pub fn from_error(target: &str, error: &RunError) -> Self {
        Self {
            target: target.to_string(),
            status: FinalStatus::Aborted,
            attempts: attempt_lines(error.completed_attempts()),
            final_artifact_path: None,
            timed_out: false,
            best_failing: None,
            error: Some(error.to_string()),
            duration_ms: 0,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// Human-readable multi-line report.
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}\n", self.target, self.status);

        if let Some(path) = &self.final_artifact_path {
            out.push_str(&format!("  artifact: {}\n", path.display()));
        }
        if self.timed_out {
            out.push_str("  run deadline exceeded\n");
        }
        if let Some(err) = &self.error {
            out.push_str(&format!("  error: {}\n", err));
        }

        for line in &self.attempts {
            let label = line
                .category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "pass".to_string());
            if line.category.is_some() {
                out.push_str(&format!(
                    "  attempt {}: {} - {}\n",
                    line.index, label, line.summary
                ));
            } else {
                out.push_str(&format!("  attempt {}: {}\n", line.index, label));
            }
        }

        if let Some(best) = &self.best_failing {
            out.push_str(&format!(
                "  closest failing candidate: attempt {} ({}, {} offending rows)\n",
                best.attempt, best.category, best.offending_rows
            ));
        }
        out
    }
}
