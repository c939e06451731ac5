//! Collaborator interfaces
//!
//! The loop only knows these three traits. Any implementation works:
//! the agent crate provides LLM/subprocess-backed ones, tests provide
//! scripted fakes.

use crate::feedback::FeedbackDirective;
use crate::target::{ColumnSpec, StructuralSummary, TargetSpec};
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Infrastructure failure inside a collaborator.
///
/// Distinct from a failing `Verdict`: these abort the run instead of being
/// fed back into generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} crashed: {message}")]
    Crashed {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} returned an unusable response: {message}")]
    Protocol {
        collaborator: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            message: message.into(),
        }
    }

    pub fn crashed(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Crashed {
            collaborator,
            message: message.into(),
        }
    }

    pub fn protocol(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            collaborator,
            message: message.into(),
        }
    }
}

/// Everything the generator sees for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub spec: &'a TargetSpec,
    pub summary: &'a StructuralSummary,
    /// Directives from every earlier attempt, oldest first
    pub feedback: &'a [FeedbackDirective],
    /// 1-based attempt number this request is for
    pub attempt: u32,
}

impl<'a> GenerationRequest<'a> {
    /// Directive from the immediately preceding attempt
    pub fn latest_feedback(&self) -> Option<&'a FeedbackDirective> {
        self.feedback.last()
    }

    pub fn is_first_attempt(&self) -> bool {
        self.feedback.is_empty()
    }
}

/// Produces a structural description of the sample document.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        document: &Path,
        schema_hint: &[ColumnSpec],
    ) -> Result<StructuralSummary, CollaboratorError>;
}

/// Writes candidate parser source.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, CollaboratorError>;
}

/// Runs a candidate in isolation against the target's sample data.
///
/// Implementations should honor `timeout` themselves; the orchestrator
/// additionally bounds the whole call and reports overruns as a Timeout
/// verdict.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        source: &str,
        spec: &TargetSpec,
        timeout: Duration,
    ) -> Result<Verdict, CollaboratorError>;
}
