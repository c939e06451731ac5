//! Attempt log and run results

use crate::feedback::FeedbackDirective;
use crate::state_machine::TransitionRecord;
use crate::verdict::{FailureCategory, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One generate/validate cycle and its outcome.
///
/// Built in one step once the verdict (and feedback, if any) is known and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based, contiguous within a run
    pub index: u32,
    pub generated_source: String,
    pub verdict: Verdict,
    /// Directive derived from this attempt's verdict; feeds the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackDirective>,
    /// Where the candidate was written before validation
    pub source_path: PathBuf,
    /// blake3 digest of `generated_source`
    pub source_digest: String,
    pub timestamp: DateTime<Utc>,
}

impl Attempt {
    pub fn category(&self) -> Option<FailureCategory> {
        self.verdict.category()
    }
}

/// Append-only attempt sequence. Indices are assigned here, so they are
/// contiguous by construction.
#[derive(Debug, Default)]
pub struct AttemptLog {
    attempts: Vec<Attempt>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next recorded attempt will get.
    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Append the next attempt.
    pub fn record(
        &mut self,
        generated_source: String,
        verdict: Verdict,
        feedback: Option<FeedbackDirective>,
        source_path: PathBuf,
    ) -> &Attempt {
        let source_digest = blake3::hash(generated_source.as_bytes()).to_hex().to_string();
        let attempt = Attempt {
            index: self.next_index(),
            generated_source,
            verdict,
            feedback,
            source_path,
            source_digest,
            timestamp: Utc::now(),
        };
        self.attempts.push(attempt);
        &self.attempts[self.attempts.len() - 1]
    }

    pub fn into_attempts(self) -> Vec<Attempt> {
        self.attempts
    }
}

/// Terminal status of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Exhausted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// What to report when every attempt failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Report nothing beyond the attempt history
    #[default]
    Discard,
    /// Also report the closest failing candidate in `best_failing`
    KeepBestFailing,
}

/// Closest failing candidate of an exhausted run.
///
/// Reported separately from `final_artifact`; it never passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestFailing {
    pub attempt: u32,
    pub category: FailureCategory,
    pub offending_rows: usize,
    pub source: String,
}

impl BestFailing {
    /// Lowest category distance wins, then fewest mismatching rows, then
    /// the latest attempt.
    pub fn select(attempts: &[Attempt]) -> Option<Self> {
        attempts
            .iter()
            .rev()
            .filter_map(|a| a.verdict.failure().map(|f| (a, f)))
            .min_by_key(|(_, f)| (f.category.distance(), f.offending_row_count()))
            .map(|(attempt, failure)| Self {
                attempt: attempt.index,
                category: failure.category,
                offending_rows: failure.offending_row_count(),
                source: attempt.generated_source.clone(),
            })
    }
}

/// Final outcome of a run, built exactly once at loop exit.
///
/// `final_artifact` is `Some` if and only if `status` is `Succeeded`; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    target: String,
    status: RunStatus,
    attempts: Vec<Attempt>,
    final_artifact: Option<String>,
    final_artifact_path: Option<PathBuf>,
    /// The outer run deadline stopped the loop
    timed_out: bool,
    best_failing: Option<BestFailing>,
    transitions: Vec<TransitionRecord>,
    duration_ms: u64,
}

impl RunResult {
    pub(crate) fn succeeded(
        target: String,
        attempts: Vec<Attempt>,
        final_artifact: String,
        final_artifact_path: PathBuf,
        transitions: Vec<TransitionRecord>,
        duration_ms: u64,
    ) -> Self {
        Self {
            target,
            status: RunStatus::Succeeded,
            attempts,
            final_artifact: Some(final_artifact),
            final_artifact_path: Some(final_artifact_path),
            timed_out: false,
            best_failing: None,
            transitions,
            duration_ms,
        }
    }

    pub(crate) fn exhausted(
        target: String,
        attempts: Vec<Attempt>,
        timed_out: bool,
        policy: ExhaustionPolicy,
        transitions: Vec<TransitionRecord>,
        duration_ms: u64,
    ) -> Self {
        let best_failing = match policy {
            ExhaustionPolicy::Discard => None,
            ExhaustionPolicy::KeepBestFailing => BestFailing::select(&attempts),
        };
        Self {
            target,
            status: RunStatus::Exhausted,
            attempts,
            final_artifact: None,
            final_artifact_path: None,
            timed_out,
            best_failing,
            transitions,
            duration_ms,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn final_artifact(&self) -> Option<&str> {
        self.final_artifact.as_deref()
    }

    pub fn final_artifact_path(&self) -> Option<&PathBuf> {
        self.final_artifact_path.as_ref()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn best_failing(&self) -> Option<&BestFailing> {
        self.best_failing.as_ref()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}
