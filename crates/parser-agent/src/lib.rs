//! Bank statement parser agent
//!
//! Concrete collaborators for the repair loop:
//! - [`generator::LlmGenerator`]: writes candidate parsers with a chat model
//! - [`validator::PythonValidator`]: runs candidates against the sample data
//! - [`summarizer::PdfSummarizer`]: describes the sample PDF's structure
//!
//! plus environment configuration and expected-output analysis.

pub mod config;
pub mod error;
pub mod generator;
pub mod harness;
pub mod llm;
pub mod prompts;
pub mod sample;
pub mod summarizer;
pub mod validator;

pub use config::{AgentConfig, Provider, ProviderEndpoint};
pub use error::AgentError;
pub use generator::LlmGenerator;
pub use llm::{extract_code, ChatClient, Completion, LlmError};
pub use sample::ExpectedSample;
pub use summarizer::PdfSummarizer;
pub use validator::PythonValidator;
