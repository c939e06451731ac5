use anyhow::{Context, Result};
use clap::Parser;
use parser_agent::{
    AgentConfig, ChatClient, ExpectedSample, LlmGenerator, PdfSummarizer, Provider,
    PythonValidator,
};
use repair_loop::{
    ArtifactStore, AttemptOrchestrator, ExhaustionPolicy, RunReport, Summarizer,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Generate a bank statement parser from a sample PDF and its expected CSV.
#[derive(Parser, Debug)]
#[command(name = "parser-agent", version)]
struct Cli {
    /// Target bank name, e.g. icici (names the generated parser module)
    #[arg(long)]
    target: String,

    /// Sample statement PDF
    #[arg(long)]
    pdf: PathBuf,

    /// Expected parser output for the sample PDF
    #[arg(long)]
    csv: PathBuf,

    /// LLM provider [env: PARSER_AGENT_PROVIDER]
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Attempts before giving up [env: PARSER_AGENT_MAX_ATTEMPTS]
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-candidate validation budget in seconds [env: PARSER_AGENT_TIMEOUT_SECS]
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Deadline for the whole run in seconds [env: PARSER_AGENT_DEADLINE_SECS]
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Where parsers and attempt candidates are written [env: PARSER_AGENT_OUTPUT_DIR]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// On exhaustion, also report the closest failing candidate
    #[arg(long)]
    keep_best_failing: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(secs) = self.timeout_secs {
            config.validation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.deadline_secs {
            config.run_deadline = Some(Duration::from_secs(secs));
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.keep_best_failing {
            config.exhaustion_policy = ExhaustionPolicy::KeepBestFailing;
        }
    }
}

async fn run(cli: &Cli, config: &AgentConfig) -> Result<RunReport> {
    let sample = ExpectedSample::from_csv(&cli.csv).context("Failed to analyze expected output")?;
    let spec = sample
        .target_spec(&cli.target, &cli.pdf, &cli.csv)
        .context("Invalid target")?;
    info!(
        target_name = %spec.target_name(),
        columns = %spec.ordered_columns(),
        expected_rows = sample.row_count,
        "Loaded expected output"
    );

    let endpoint = config.endpoint()?;
    info!(provider = %endpoint.provider, model = %endpoint.model, "Using LLM provider");
    let client = ChatClient::new(endpoint, config.temperature, config.max_tokens)
        .context("Failed to build LLM client")?;

    let summary = PdfSummarizer::new(&config.python)
        .summarize(&cli.pdf, spec.schema())
        .await
        .context("Failed to summarize sample PDF")?
        .with_expected_rows(sample.preview_with_header());

    let orchestrator = AttemptOrchestrator::new(
        LlmGenerator::new(client),
        PythonValidator::new(&config.python),
        ArtifactStore::new(&config.output_dir),
        config.orchestrator_config(),
    );

    let report = match orchestrator.run(&spec, &summary, config.max_attempts).await {
        Ok(result) => RunReport::from_result(&result),
        Err(e) => {
            error!(target_name = %spec.target_name(), error = %e, "Run failed");
            RunReport::from_error(spec.target_name(), &e)
        }
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::default();
    cli.apply(&mut config);

    info!(
        target_name = %cli.target,
        provider = %config.provider,
        max_attempts = config.max_attempts,
        timeout_secs = config.validation_timeout.as_secs(),
        output_dir = %config.output_dir.display(),
        "Parser agent starting"
    );

    match run(&cli, &config).await {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Failed to serialize report: {e}");
                        return ExitCode::from(2);
                    }
                }
            } else {
                print!("{}", report.render());
            }
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "parser-agent",
            "--target",
            "icici",
            "--pdf",
            "data/icici/icici_sample.pdf",
            "--csv",
            "data/icici/result.csv",
            "--provider",
            "groq",
            "--max-attempts",
            "5",
            "--timeout-secs",
            "10",
            "--keep-best-failing",
        ]);
        let mut config = AgentConfig::from_lookup(|_| None);
        cli.apply(&mut config);

        assert_eq!(config.provider, Provider::Groq);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.validation_timeout, Duration::from_secs(10));
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::KeepBestFailing);
        assert_eq!(config.run_deadline, None);
        assert!(!cli.json);
    }
}
