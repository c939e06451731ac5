use crate::error::AgentError;
use clap::ValueEnum;
use repair_loop::{ExhaustionPolicy, OrchestratorConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// LLM provider serving the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Google Gemini via its OpenAI-compatible endpoint
    Gemini,
    /// Groq-hosted Llama models
    Groq,
}

impl Provider {
    /// Env var holding this provider's API key
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Gemini => "GOOGLE_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }

    fn default_url(self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Groq => "https://api.groq.com/openai/v1",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-1.5-flash",
            Self::Groq => "llama3-8b-8192",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            Self::Gemini => "PARSER_AGENT_GEMINI",
            Self::Groq => "PARSER_AGENT_GROQ",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Groq => write!(f, "groq"),
        }
    }
}

impl FromStr for Provider {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            other => Err(AgentError::UnknownProvider(other.to_string())),
        }
    }
}

/// Resolved chat-completions endpoint.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub provider: Provider,
    /// OpenAI-compatible base URL (without `/chat/completions`)
    pub url: String,
    pub model: String,
    pub api_key: String,
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Top-level agent configuration.
///
/// `Default` reads the environment; CLI flags override individual fields.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub provider: Provider,
    /// Attempts per target before giving up
    pub max_attempts: u32,
    /// Wall-clock budget for validating one candidate
    pub validation_timeout: Duration,
    /// Outer deadline for a whole run (None = unbounded)
    pub run_deadline: Option<Duration>,
    /// Where final parsers and attempt candidates are written
    pub output_dir: PathBuf,
    /// Python interpreter used for the harness and PDF probe
    pub python: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, var: &str, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var, value = %raw, "Ignoring unparseable environment value");
            default
        }),
        None => default,
    }
}

impl AgentConfig {
    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let provider = lookup("PARSER_AGENT_PROVIDER")
            .and_then(|raw| match raw.parse() {
                Ok(provider) => Some(provider),
                Err(e) => {
                    warn!(error = %e, "Falling back to the default provider");
                    None
                }
            })
            .unwrap_or(Provider::Gemini);

        let max_attempts = parse_or(lookup("PARSER_AGENT_MAX_ATTEMPTS"), "PARSER_AGENT_MAX_ATTEMPTS", 3);
        let timeout_secs = parse_or(lookup("PARSER_AGENT_TIMEOUT_SECS"), "PARSER_AGENT_TIMEOUT_SECS", 30u64);
        let run_deadline = lookup("PARSER_AGENT_DEADLINE_SECS")
            .map(|raw| parse_or(Some(raw), "PARSER_AGENT_DEADLINE_SECS", 0u64))
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            provider,
            max_attempts,
            validation_timeout: Duration::from_secs(timeout_secs),
            run_deadline,
            output_dir: lookup("PARSER_AGENT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("custom_parsers")),
            python: lookup("PARSER_AGENT_PYTHON").unwrap_or_else(|| "python3".into()),
            temperature: 0.1,
            max_tokens: 4000,
            exhaustion_policy: ExhaustionPolicy::Discard,
        }
    }

    /// Resolve the configured provider's endpoint from the environment.
    pub fn endpoint(&self) -> Result<ProviderEndpoint, AgentError> {
        self.endpoint_from(|var| std::env::var(var).ok())
    }

    /// Resolve the endpoint from an arbitrary variable source. The API key
    /// is required; URL and model have per-provider defaults.
    pub fn endpoint_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderEndpoint, AgentError> {
        let provider = self.provider;
        let api_key = lookup(provider.api_key_var())
            .filter(|key| !key.trim().is_empty())
            .ok_or(AgentError::MissingApiKey {
                provider,
                var: provider.api_key_var(),
            })?;

        let prefix = provider.env_prefix();
        Ok(ProviderEndpoint {
            provider,
            url: lookup(&format!("{prefix}_URL"))
                .unwrap_or_else(|| provider.default_url().into())
                .trim_end_matches('/')
                .to_string(),
            model: lookup(&format!("{prefix}_MODEL"))
                .unwrap_or_else(|| provider.default_model().into()),
            api_key,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            validation_timeout: self.validation_timeout,
            run_deadline: self.run_deadline,
            exhaustion_policy: self.exhaustion_policy,
            ..OrchestratorConfig::default()
        }
    }
}
