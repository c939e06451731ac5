//! Repair Loop Library
//!
//! Bounded generate → validate → repair loop for producing parser modules:
//! - A generator writes a candidate parser for a target document type
//! - A validator runs it in isolation against sample input and expected output
//! - Failures are classified and compiled into correction feedback
//! - The next attempt sees that feedback; the loop stops on the first pass
//!   or when the attempt budget is consumed
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = AttemptOrchestrator::new(
//!     generator,
//!     validator,
//!     ArtifactStore::new("custom_parsers"),
//!     OrchestratorConfig::default(),
//! );
//! let result = orchestrator.run(&spec, &summary, 3).await?;
//! ```
//!
//! Collaborators are plain traits (see [`collaborators`]), so the loop runs
//! unchanged against LLM-backed generators or scripted test fakes.

#![allow(clippy::uninlined_format_args)]

pub mod attempt;
pub mod collaborators;
pub mod error;
pub mod feedback;
pub mod orchestrator;
pub mod report;
pub mod state_machine;
pub mod store;
pub mod target;
pub mod verdict;

pub use attempt::{Attempt, AttemptLog, BestFailing, ExhaustionPolicy, RunResult, RunStatus};
pub use collaborators::{CollaboratorError, GenerationRequest, Generator, Summarizer, Validator};
pub use error::{ConfigError, RunError, Stage, StoreError};
pub use feedback::{
    classify, render_history, FeedbackCompiler, FeedbackConfig, FeedbackDirective, HarnessOutput,
    HarnessRecord,
};
pub use orchestrator::{AttemptOrchestrator, OrchestratorConfig};
pub use report::{FinalStatus, RunReport};
pub use state_machine::{IllegalTransition, RunState, RunStateMachine, TransitionRecord};
pub use store::{ArtifactStore, TargetLock};
pub use target::{ColumnSpec, SemanticType, StructuralSummary, TargetSpec};
pub use verdict::{ColumnDiff, Failure, FailureCategory, RowMismatch, Verdict};
