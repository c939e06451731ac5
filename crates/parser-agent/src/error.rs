use crate::config::Provider;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{var} is not set (required for provider '{provider}')")]
    MissingApiKey {
        provider: Provider,
        var: &'static str,
    },

    #[error("Unknown provider '{0}' (expected gemini or groq)")]
    UnknownProvider(String),

    #[error("Cannot read expected output {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Expected output {} has no header row", path.display())]
    EmptyCsv { path: PathBuf },

    #[error("Sample file not found: {}", path.display())]
    MissingSample { path: PathBuf },
}
