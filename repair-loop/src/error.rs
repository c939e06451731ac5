//! Run error types
//!
//! Logical failures never appear here: they are recovered inside the loop
//! as feedback. Everything in this module is fatal for a run and is kept
//! distinct from exhaustion so callers can tell "the model couldn't solve
//! it" from "the system broke".

use crate::attempt::Attempt;
use crate::state_machine::IllegalTransition;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid input detected before any attempt is consumed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Target '{target}' has an empty schema")]
    EmptySchema { target: String },

    #[error("Schema column at position {position} has an empty name")]
    EmptyColumnName { position: usize },

    #[error("Schema column '{name}' appears more than once")]
    DuplicateColumn { name: String },

    #[error("Invalid target name '{name}': use letters, digits, '_' or '-'")]
    InvalidTargetName { name: String },

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("Validation timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Configuration error: {message}")]
    Invalid { message: String },
}

/// Artifact store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Target '{target}' is already being generated (lock held at {})", path.display())]
    Busy { target: String, path: PathBuf },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize attempt record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The step of the loop that hit an infrastructure failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Validate,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generate => write!(f, "generate"),
            Self::Validate => write!(f, "validate"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// Fatal run errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Target '{target}' already has a run in progress")]
    TargetBusy { target: String },

    /// A collaborator or the store failed. `completed` holds every attempt
    /// that finished before the failure; the in-flight one is not included.
    #[error("{stage} failed on attempt {attempt} of target '{target}': {message}")]
    Infrastructure {
        target: String,
        stage: Stage,
        attempt: u32,
        message: String,
        completed: Vec<Attempt>,
    },

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

impl RunError {
    /// Attempts that completed before the run aborted.
    pub fn completed_attempts(&self) -> &[Attempt] {
        match self {
            Self::Infrastructure { completed, .. } => completed,
            _ => &[],
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
