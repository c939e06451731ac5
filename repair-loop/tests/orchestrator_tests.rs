//! Attempt loop scenarios against scripted collaborators.
//!
//! Time is paused, so timeouts and deadlines advance instantly and
//! deterministically.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use repair_loop::{
    render_history, ArtifactStore, AttemptOrchestrator, CollaboratorError, ColumnDiff,
    ColumnSpec, ConfigError, ExhaustionPolicy, Failure, FailureCategory, GenerationRequest,
    Generator, OrchestratorConfig, RowMismatch, RunError, RunState, RunStatus, SemanticType,
    Stage, StructuralSummary, TargetSpec, Validator, Verdict,
};

const COLUMNS: [&str; 4] = ["Date", "Description", "Amount", "Balance"];

fn spec(target: &str) -> TargetSpec {
    let schema = vec![
        ColumnSpec::new("Date", SemanticType::Date),
        ColumnSpec::new("Description", SemanticType::Text),
        ColumnSpec::new("Amount", SemanticType::Float),
        ColumnSpec::new("Balance", SemanticType::Float),
    ];
    TargetSpec::new(
        target,
        schema,
        format!("data/{target}/{target}_sample.pdf"),
        format!("data/{target}/result.csv"),
    )
    .unwrap()
}

fn summary() -> StructuralSummary {
    StructuralSummary::from_text("ChatGPT Powered Karbon Bannk Statement")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// What the generator saw for one attempt
#[derive(Debug, Clone)]
struct SeenRequest {
    attempt: u32,
    feedback_len: usize,
    latest: Option<FailureCategory>,
    latest_hint: Option<String>,
    rendered: String,
}

/// Returns "candidate N" for attempt N and records every request.
struct ScriptedGenerator {
    seen: Mutex<Vec<SeenRequest>>,
    fail_on: Option<u32>,
    delay: Option<Duration>,
    yield_first: bool,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
            delay: None,
            yield_first: false,
        }
    }

    fn failing_on(attempt: u32) -> Self {
        Self {
            fail_on: Some(attempt),
            ..Self::new()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn yielding() -> Self {
        Self {
            yield_first: true,
            ..Self::new()
        }
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, CollaboratorError> {
        self.seen.lock().unwrap().push(SeenRequest {
            attempt: request.attempt,
            feedback_len: request.feedback.len(),
            latest: request.latest_feedback().map(|d| d.category),
            latest_hint: request.latest_feedback().map(|d| d.hint.clone()),
            rendered: render_history(request.feedback),
        });

        if self.yield_first {
            tokio::task::yield_now().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(request.attempt) {
            return Err(CollaboratorError::unavailable("generator", "provider unreachable"));
        }
        Ok(format!(
            "# {}\ndef parse(pdf_path):\n    return candidate({})\n",
            request.spec.target_name(),
            request.attempt
        ))
    }
}

enum Step {
    Verdict(Verdict),
    Crash(&'static str),
    Hang,
}

/// Plays back one step per call; repeats `fallback` once the script runs out.
struct ScriptedValidator {
    script: Mutex<VecDeque<Step>>,
    fallback: Verdict,
    calls: Mutex<u32>,
}

impl ScriptedValidator {
    fn new(script: Vec<Step>, fallback: Verdict) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    fn always(verdict: Verdict) -> Self {
        Self::new(Vec::new(), verdict)
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(
        &self,
        _source: &str,
        _spec: &TargetSpec,
        _timeout: Duration,
    ) -> Result<Verdict, CollaboratorError> {
        *self.calls.lock().unwrap() += 1;
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Verdict(verdict)) => Ok(verdict),
            Some(Step::Crash(message)) => Err(CollaboratorError::crashed("validator", message)),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(self.fallback.clone()),
        }
    }
}

fn runtime_error() -> Verdict {
    Verdict::Fail(Failure::new(
        FailureCategory::RuntimeError,
        "Traceback (most recent call last):\n  File \"parser.py\", line 9, in parse\nIndexError: list index out of range",
    ))
}

fn amt_schema_mismatch() -> Verdict {
    Verdict::Fail(Failure::schema_mismatch(ColumnDiff::new(
        COLUMNS.iter().map(|c| c.to_string()).collect(),
        vec!["Date".into(), "Description".into(), "Amt".into(), "Balance".into()],
    )))
}

fn value_mismatch(rows: usize) -> Verdict {
    let rows = (0..rows)
        .map(|row| RowMismatch {
            row,
            column: "Balance".into(),
            expected: "1935.3".into(),
            actual: "1,935.30".into(),
        })
        .collect();
    Verdict::Fail(Failure::value_mismatch("DataFrame values are different", rows))
}

fn orchestrator<G: Generator, V: Validator>(
    generator: G,
    validator: V,
    root: &std::path::Path,
    config: OrchestratorConfig,
) -> AttemptOrchestrator<G, V> {
    AttemptOrchestrator::new(generator, validator, ArtifactStore::new(root), config)
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_passes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let result = orch.run(&spec("icici"), &summary(), 3).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    assert_eq!(result.attempts().len(), 1);
    assert!(result.attempts()[0].verdict.is_pass());

    let artifact_path = result.final_artifact_path().unwrap();
    assert_eq!(artifact_path, &dir.path().join("icici_parser.py"));
    let on_disk = std::fs::read_to_string(artifact_path).unwrap();
    assert_eq!(Some(on_disk.as_str()), result.final_artifact());
    assert_eq!(result.attempts()[0].generated_source, on_disk);

    let states: Vec<RunState> = result.transitions().iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            RunState::Generating,
            RunState::Validating,
            RunState::Persisting,
            RunState::Succeeded
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_consumes_exact_budget() {
    for max_attempts in 1..=4u32 {
        let dir = tempfile::tempdir().unwrap();
        let validator = ScriptedValidator::always(runtime_error());
        let orch = orchestrator(
            ScriptedGenerator::new(),
            validator,
            dir.path(),
            OrchestratorConfig::default(),
        );

        let result = orch.run(&spec("icici"), &summary(), max_attempts).await.unwrap();

        assert_eq!(result.status(), RunStatus::Exhausted);
        assert_eq!(result.attempts().len() as u32, max_attempts);
        let indices: Vec<u32> = result.attempts().iter().map(|a| a.index).collect();
        assert_eq!(indices, (1..=max_attempts).collect::<Vec<_>>());
        assert!(result.final_artifact().is_none());
        assert!(!result.timed_out());
        assert!(!dir.path().join("icici_parser.py").exists());
    }
}

#[tokio::test(start_paused = true)]
async fn test_schema_feedback_reaches_next_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new();
    let validator = ScriptedValidator::new(
        vec![Step::Verdict(amt_schema_mismatch())],
        Verdict::Pass,
    );
    let orch = orchestrator(generator, validator, dir.path(), OrchestratorConfig::default());

    let result = orch.run(&spec("icici"), &summary(), 3).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    assert_eq!(result.attempts().len(), 2);
    assert_eq!(
        result.attempts()[0].category(),
        Some(FailureCategory::SchemaMismatch)
    );
    assert!(result.final_artifact().unwrap().contains("candidate(2)"));

    let seen = orch_generator_seen(&orch);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].feedback_len, 0);
    assert!(seen[0].rendered.is_empty());

    assert_eq!(seen[1].attempt, 2);
    assert_eq!(seen[1].latest, Some(FailureCategory::SchemaMismatch));
    let hint = seen[1].latest_hint.as_deref().unwrap();
    assert!(hint.contains("Date, Description, Amount, Balance"));
    assert!(seen[1].rendered.contains("Amt"));
}

fn orch_generator_seen<V: Validator>(
    orch: &AttemptOrchestrator<ScriptedGenerator, V>,
) -> Vec<SeenRequest> {
    orch.generator().seen()
}

#[tokio::test(start_paused = true)]
async fn test_feedback_history_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let validator = ScriptedValidator::new(
        vec![
            Step::Verdict(runtime_error()),
            Step::Verdict(amt_schema_mismatch()),
            Step::Verdict(value_mismatch(2)),
        ],
        Verdict::Pass,
    );
    let orch = orchestrator(
        ScriptedGenerator::new(),
        validator,
        dir.path(),
        OrchestratorConfig::default(),
    );

    let result = orch.run(&spec("icici"), &summary(), 4).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.attempts().len(), 4);

    let seen = orch_generator_seen(&orch);
    let lens: Vec<usize> = seen.iter().map(|s| s.feedback_len).collect();
    assert_eq!(lens, vec![0, 1, 2, 3]);
    assert_eq!(seen[3].latest, Some(FailureCategory::ValueMismatch));
    assert!(seen[3].rendered.contains("attempt 1: runtime_error"));

    // Every failed attempt carries the directive that fed the next one.
    for attempt in &result.attempts()[..3] {
        assert!(attempt.feedback.is_some());
    }
    assert!(result.attempts()[3].feedback.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_runtime_errors_exhaust_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::always(runtime_error()),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let result = orch.run(&spec("icici"), &summary(), 3).await.unwrap();

    assert_eq!(result.status(), RunStatus::Exhausted);
    assert!(result
        .attempts()
        .iter()
        .all(|a| a.category() == Some(FailureCategory::RuntimeError)));
    assert!(result.best_failing().is_none());
    assert!(result.final_artifact_path().is_none());

    // Candidates and sidecars are kept for inspection.
    let store = orch.store();
    for index in 1..=3 {
        assert!(store.attempt_source_path("icici", index).exists());
        assert!(store.attempt_record_path("icici", index).exists());
    }
    assert_eq!(
        result.transitions().last().map(|t| t.to),
        Some(RunState::Exhausted)
    );
}

#[tokio::test(start_paused = true)]
async fn test_keep_best_failing_reports_closest_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let validator = ScriptedValidator::new(
        vec![
            Step::Verdict(runtime_error()),
            Step::Verdict(value_mismatch(5)),
            Step::Verdict(value_mismatch(1)),
        ],
        runtime_error(),
    );
    let config = OrchestratorConfig {
        exhaustion_policy: ExhaustionPolicy::KeepBestFailing,
        ..Default::default()
    };
    let orch = orchestrator(ScriptedGenerator::new(), validator, dir.path(), config);

    let result = orch.run(&spec("hdfc"), &summary(), 3).await.unwrap();

    assert_eq!(result.status(), RunStatus::Exhausted);
    assert!(result.final_artifact().is_none());
    let best = result.best_failing().unwrap();
    assert_eq!(best.attempt, 3);
    assert_eq!(best.category, FailureCategory::ValueMismatch);
    assert_eq!(best.offending_rows, 1);
    assert!(best.source.contains("candidate(3)"));
}

#[tokio::test(start_paused = true)]
async fn test_validator_crash_aborts_with_completed_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let validator = ScriptedValidator::new(
        vec![
            Step::Verdict(runtime_error()),
            Step::Crash("sandbox died"),
        ],
        Verdict::Pass,
    );
    let orch = orchestrator(
        ScriptedGenerator::new(),
        validator,
        dir.path(),
        OrchestratorConfig::default(),
    );

    let err = orch.run(&spec("icici"), &summary(), 3).await.unwrap_err();

    match &err {
        RunError::Infrastructure {
            stage,
            attempt,
            completed,
            message,
            ..
        } => {
            assert_eq!(*stage, Stage::Validate);
            assert_eq!(*attempt, 2);
            assert_eq!(completed.len(), 1);
            assert!(message.contains("sandbox died"));
        }
        other => panic!("expected infrastructure error, got {other:?}"),
    }
    assert_eq!(err.completed_attempts().len(), 1);

    // The in-flight candidate is on disk but no artifact was written.
    let store = orch.store();
    assert!(store.attempt_source_path("icici", 2).exists());
    assert!(!store.attempt_record_path("icici", 2).exists());
    assert!(!store.final_artifact_path("icici").exists());

    // Not fed back as a third attempt.
    assert_eq!(orch.validator().calls(), 2);

    // Lock released on abort.
    assert!(store.lock("icici").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_generator_failure_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::failing_on(1),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let err = orch.run(&spec("icici"), &summary(), 3).await.unwrap_err();
    assert!(matches!(
        err,
        RunError::Infrastructure {
            stage: Stage::Generate,
            attempt: 1,
            ..
        }
    ));
    assert!(err.completed_attempts().is_empty());
    assert_eq!(orch.validator().calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_validator_becomes_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig {
        validation_timeout: Duration::from_secs(2),
        timeout_grace: Duration::from_secs(1),
        ..Default::default()
    };
    let validator = ScriptedValidator::new(vec![Step::Hang], Verdict::Pass);
    let orch = orchestrator(ScriptedGenerator::new(), validator, dir.path(), config);

    let started = tokio::time::Instant::now();
    let result = orch.run(&spec("icici"), &summary(), 2).await.unwrap();
    let elapsed = started.elapsed();

    assert!(result.is_success());
    assert_eq!(result.attempts().len(), 2);
    let first = &result.attempts()[0];
    assert_eq!(first.category(), Some(FailureCategory::Timeout));
    assert!(first.verdict.failure().unwrap().message.contains("2s"));

    // Bounded by timeout + grace, not by the hang.
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_stops_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig {
        run_deadline: Some(Duration::from_secs(15)),
        ..Default::default()
    };
    let orch = orchestrator(
        ScriptedGenerator::slow(Duration::from_secs(10)),
        ScriptedValidator::always(value_mismatch(1)),
        dir.path(),
        config,
    );

    let result = orch.run(&spec("icici"), &summary(), 5).await.unwrap();

    assert_eq!(result.status(), RunStatus::Exhausted);
    assert!(result.timed_out());
    // Attempt 2 was still generating when the deadline hit.
    assert_eq!(result.attempts().len(), 1);
    assert!(!orch.store().attempt_source_path("icici", 2).exists());
    assert!(result.final_artifact().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_zero_attempts_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let err = orch.run(&spec("icici"), &summary(), 0).await.unwrap_err();
    assert!(matches!(err, RunError::Configuration(ConfigError::ZeroAttempts)));
    assert!(orch.generator().seen().is_empty());
    assert!(!orch.store().attempts_dir("icici").exists());
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig {
        validation_timeout: Duration::ZERO,
        ..Default::default()
    };
    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        config,
    );

    let err = orch.run(&spec("icici"), &summary(), 3).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(orch.generator().seen().is_empty());
}

#[test]
fn test_empty_schema_rejected_before_any_attempt() {
    let err = TargetSpec::new("icici", vec![], "a.pdf", "a.csv").unwrap_err();
    assert_eq!(
        err,
        ConfigError::EmptySchema {
            target: "icici".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_busy_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let held = orch.store().lock("icici").unwrap();
    let err = orch.run(&spec("icici"), &summary(), 3).await.unwrap_err();
    assert!(matches!(err, RunError::TargetBusy { ref target } if target == "icici"));
    assert!(orch.generator().seen().is_empty());

    drop(held);
    assert!(orch.run(&spec("icici"), &summary(), 3).await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_lock_file_from_killed_run_does_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let locks = dir.path().join(".locks");
    std::fs::create_dir_all(&locks).unwrap();
    std::fs::write(locks.join("icici.lock"), "999999\n").unwrap();

    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let result = orch.run(&spec("icici"), &summary(), 3).await.unwrap();
    assert_eq!(result.status(), RunStatus::Succeeded);
    assert_eq!(result.attempts().len(), 1);
    assert!(dir.path().join("icici_parser.py").exists());
}

#[tokio::test(start_paused = true)]
async fn test_batch_runs_targets_independently() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::yielding(),
        ScriptedValidator::always(Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    let jobs = vec![
        (spec("icici"), summary()),
        (spec("sbi"), summary()),
        (spec("icici"), summary()),
    ];
    let results = orch.run_batch(&jobs, 3).await;

    assert_eq!(results.len(), 3);
    let icici = results[0].as_ref().unwrap();
    let sbi = results[1].as_ref().unwrap();
    assert_eq!(icici.target(), "icici");
    assert_eq!(sbi.target(), "sbi");
    assert!(icici.final_artifact().unwrap().starts_with("# icici"));
    assert!(sbi.final_artifact().unwrap().starts_with("# sbi"));
    assert!(dir.path().join("icici_parser.py").exists());
    assert!(dir.path().join("sbi_parser.py").exists());

    assert!(matches!(results[2], Err(RunError::TargetBusy { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_rerun_clears_previous_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        ScriptedGenerator::new(),
        ScriptedValidator::new(vec![Step::Verdict(runtime_error())], Verdict::Pass),
        dir.path(),
        OrchestratorConfig::default(),
    );

    orch.run(&spec("icici"), &summary(), 3).await.unwrap();
    assert!(orch.store().attempt_source_path("icici", 2).exists());

    let second = orch.run(&spec("icici"), &summary(), 3).await.unwrap();
    assert_eq!(second.attempts().len(), 1);
    assert!(!orch.store().attempt_source_path("icici", 2).exists());
}
