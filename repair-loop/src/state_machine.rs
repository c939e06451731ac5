//! Run State Machine — explicit states and legal transition guards.
//!
//! Provides a typed state model for the attempt loop so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are rejected by `advance()` instead of silently
//!    corrupting the run.
//! 3. The transition log ends up in the run result for post-mortems.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The set of run states.
///
/// Every run starts at `Preparing` and terminates at exactly one of
/// `Succeeded`, `Exhausted` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Lock acquired, attempt namespace reset, nothing generated yet.
    Preparing,
    /// Waiting on the generator for attempt N.
    Generating,
    /// Candidate persisted, waiting on the validator.
    Validating,
    /// Turning a failing verdict into the next directive.
    CompilingFeedback,
    /// Writing the passing candidate to its stable location.
    Persisting,
    /// A candidate passed — terminal state.
    Succeeded,
    /// Attempt budget or run deadline consumed — terminal state.
    Exhausted,
    /// A collaborator or the store failed — terminal state.
    Aborted,
}

impl RunState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "Preparing"),
            Self::Generating => write!(f, "Generating"),
            Self::Validating => write!(f, "Validating"),
            Self::CompilingFeedback => write!(f, "CompilingFeedback"),
            Self::Persisting => write!(f, "Persisting"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Legal transitions between run states.
///
/// ```text
/// Preparing → Generating
/// Generating → Validating | Exhausted (deadline)
/// Validating → Persisting | CompilingFeedback | Exhausted (deadline)
/// CompilingFeedback → Generating | Exhausted
/// Persisting → Succeeded
/// any non-terminal → Aborted
/// ```
fn is_legal_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;

    if to == Aborted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Preparing, Generating)
            | (Generating, Validating)
            | (Generating, Exhausted)
            | (Validating, Persisting)
            | (Validating, CompilingFeedback)
            | (Validating, Exhausted)
            | (CompilingFeedback, Generating)
            | (CompilingFeedback, Exhausted)
            | (Persisting, Succeeded)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunState,
    pub to: RunState,
    /// Attempt number at the time of transition (0 before the first attempt).
    pub attempt: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state, enforces legal transitions, and keeps the
/// complete transition log.
pub struct RunStateMachine {
    current: RunState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Preparing,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Attempt to advance to the next state.
    pub fn advance(&mut self, to: RunState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "State transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Aborted`; legal from any non-terminal state.
    pub fn abort(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RunState::Aborted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line history, e.g. `Preparing → Succeeded (12ms, 5 transitions)`.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} → {} ({}ms, {} transitions)",
            RunState::Preparing,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !self.transitions.is_empty() {
            let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
            summary.push_str(&format!(" [{}]", states.join(" → ")));
        }
        summary
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = RunStateMachine::new();
        assert_eq!(sm.current(), RunState::Preparing);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_first_attempt_passes() {
        let mut sm = RunStateMachine::new();
        sm.set_attempt(1);
        sm.advance(RunState::Generating, None).unwrap();
        sm.advance(RunState::Validating, None).unwrap();
        sm.advance(RunState::Persisting, Some("pass")).unwrap();
        sm.advance(RunState::Succeeded, None).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 4);
    }

    #[test]
    fn test_retry_then_exhaust() {
        let mut sm = RunStateMachine::new();
        for attempt in 1..=2 {
            sm.set_attempt(attempt);
            sm.advance(RunState::Generating, None).unwrap();
            sm.advance(RunState::Validating, None).unwrap();
            sm.advance(RunState::CompilingFeedback, Some("runtime_error"))
                .unwrap();
        }
        sm.advance(RunState::Exhausted, Some("budget consumed")).unwrap();

        assert_eq!(sm.current(), RunState::Exhausted);
        assert_eq!(sm.transitions()[3].attempt, 2);
    }

    #[test]
    fn test_deadline_during_generation() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Generating, None).unwrap();
        sm.advance(RunState::Exhausted, Some("deadline")).unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_abort_from_any_non_terminal_state() {
        for state in [
            RunState::Preparing,
            RunState::Generating,
            RunState::Validating,
            RunState::CompilingFeedback,
            RunState::Persisting,
        ] {
            let mut sm = RunStateMachine {
                current: state,
                attempt: 0,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            assert!(sm.abort("collaborator crashed").is_ok());
            assert_eq!(sm.current(), RunState::Aborted);
        }
    }

    #[test]
    fn test_cannot_leave_terminal_state() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Generating, None).unwrap();
        sm.advance(RunState::Validating, None).unwrap();
        sm.advance(RunState::Persisting, None).unwrap();
        sm.advance(RunState::Succeeded, None).unwrap();

        let err = sm.advance(RunState::Generating, None).unwrap_err();
        assert_eq!(err.from, RunState::Succeeded);
        assert!(sm.abort("late").is_err());
    }

    #[test]
    fn test_pass_must_be_persisted_first() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Generating, None).unwrap();
        sm.advance(RunState::Validating, None).unwrap();
        assert!(sm.advance(RunState::Succeeded, None).is_err());
    }

    #[test]
    fn test_cannot_skip_validation() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Generating, None).unwrap();
        assert!(sm.advance(RunState::CompilingFeedback, None).is_err());
    }

    #[test]
    fn test_summary() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Generating, None).unwrap();
        sm.abort("test").unwrap();
        let summary = sm.summary();
        assert!(summary.contains("Aborted"));
        assert!(summary.contains("2 transitions"));
    }

    #[test]
    fn test_transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: RunState::Validating,
            to: RunState::CompilingFeedback,
            attempt: 2,
            elapsed_ms: 120,
            reason: Some("schema_mismatch".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
