//! Attempt Orchestrator — the bounded generate → validate → repair loop
//!
//! Each iteration:
//! 1. Builds the generation request (target, summary, feedback so far)
//! 2. Asks the generator for a candidate
//! 3. Writes the candidate to its attempt-scoped path
//! 4. Validates it under a scoped time budget
//! 5. On pass, writes the final artifact and stops; on fail, compiles
//!    feedback and loops until the attempt budget is consumed
//!
//! Collaborator infrastructure failures abort the run immediately and are
//! never fed back into generation.

use crate::attempt::{Attempt, AttemptLog, ExhaustionPolicy, RunResult};
use crate::collaborators::{CollaboratorError, GenerationRequest, Generator, Validator};
use crate::error::{ConfigError, RunError, Stage, StoreError};
use crate::feedback::{FeedbackCompiler, FeedbackConfig, FeedbackDirective};
use crate::state_machine::{RunState, RunStateMachine};
use crate::store::ArtifactStore;
use crate::target::{StructuralSummary, TargetSpec};
use crate::verdict::{Failure, Verdict};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Configuration for the attempt loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget handed to the validator for one candidate
    pub validation_timeout: Duration,
    /// Extra time allowed before the orchestrator stops waiting on the
    /// validator and records a Timeout itself
    pub timeout_grace: Duration,
    /// Outer deadline for the whole run
    pub run_deadline: Option<Duration>,
    pub exhaustion_policy: ExhaustionPolicy,
    pub feedback: FeedbackConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            validation_timeout: Duration::from_secs(30),
            timeout_grace: Duration::from_secs(5),
            run_deadline: None,
            exhaustion_policy: ExhaustionPolicy::Discard,
            feedback: FeedbackConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.run_deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid {
                message: "run deadline must be greater than zero".to_string(),
            });
        }
        if self.feedback.excerpt_max_chars == 0 {
            return Err(ConfigError::Invalid {
                message: "feedback excerpt budget must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of a collaborator call raced against the run deadline
enum Bounded<T> {
    Done(T),
    DeadlineExpired,
}

async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Bounded<F::Output> {
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, fut).await {
            Ok(output) => Bounded::Done(output),
            Err(_) => Bounded::DeadlineExpired,
        },
        None => Bounded::Done(fut.await),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Drives one target's attempts to success or bounded exhaustion.
///
/// Holds no per-run state, so a single orchestrator can run several
/// distinct targets concurrently (see [`run_batch`](Self::run_batch)).
pub struct AttemptOrchestrator<G, V> {
    generator: G,
    validator: V,
    store: ArtifactStore,
    compiler: FeedbackCompiler,
    config: OrchestratorConfig,
}

impl<G: Generator, V: Validator> AttemptOrchestrator<G, V> {
    pub fn new(generator: G, validator: V, store: ArtifactStore, config: OrchestratorConfig) -> Self {
        Self {
            generator,
            validator,
            store,
            compiler: FeedbackCompiler::new(config.feedback.clone()),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Run the loop for one target with at most `max_attempts` attempts.
    ///
    /// Returns `Ok` for both Succeeded and Exhausted; `Err` only for
    /// configuration problems (before any attempt), a concurrent run on the
    /// same target, or infrastructure failures.
    pub async fn run(
        &self,
        spec: &TargetSpec,
        summary: &StructuralSummary,
        max_attempts: u32,
    ) -> Result<RunResult, RunError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts.into());
        }
        self.config.validate()?;

        let target = spec.target_name();
        let _lock = self.store.lock(target).map_err(|e| match e {
            StoreError::Busy { target, .. } => RunError::TargetBusy { target },
            other => RunError::Infrastructure {
                target: target.to_string(),
                stage: Stage::Persist,
                attempt: 0,
                message: other.to_string(),
                completed: Vec::new(),
            },
        })?;

        let mut machine = RunStateMachine::new();
        let mut log = AttemptLog::new();
        if let Err(e) = self.store.reset_attempts(target) {
            return Err(self.abort(target, Stage::Persist, 0, e.to_string(), log, machine));
        }

        let started = Instant::now();
        let deadline = self.config.run_deadline.map(|d| started + d);
        let mut history: Vec<FeedbackDirective> = Vec::new();

        info!(
            target_name = %target,
            max_attempts,
            columns = %spec.ordered_columns(),
            "Run starting"
        );

        loop {
            let index = log.next_index();

            if index > max_attempts {
                machine.advance(RunState::Exhausted, Some("attempt budget consumed"))?;
                warn!(target_name = %target, attempts = log.len(), "Attempt budget exhausted");
                return Ok(self.exhausted(target, log, machine, started, false));
            }
            if index > 1 && deadline.is_some_and(|at| Instant::now() >= at) {
                return self.deadline_expired(target, log, machine, started);
            }

            machine.set_attempt(index);
            machine.advance(RunState::Generating, None)?;

            let request = GenerationRequest {
                spec,
                summary,
                feedback: &history,
                attempt: index,
            };
            info!(target_name = %target, attempt = index, max_attempts, "Generating candidate");

            let source = match within(deadline, self.generator.generate(&request)).await {
                Bounded::DeadlineExpired => {
                    return self.deadline_expired(target, log, machine, started);
                }
                Bounded::Done(Err(e)) => {
                    return Err(self.abort(target, Stage::Generate, index, e.to_string(), log, machine));
                }
                Bounded::Done(Ok(source)) => source,
            };

            let source_path = match self.store.write_attempt_source(target, index, &source) {
                Ok(path) => path,
                Err(e) => {
                    return Err(self.abort(target, Stage::Persist, index, e.to_string(), log, machine));
                }
            };

            machine.advance(RunState::Validating, None)?;
            let verdict = match within(deadline, self.validate_scoped(&source, spec)).await {
                Bounded::DeadlineExpired => {
                    return self.deadline_expired(target, log, machine, started);
                }
                Bounded::Done(Err(e)) => {
                    return Err(self.abort(target, Stage::Validate, index, e.to_string(), log, machine));
                }
                Bounded::Done(Ok(verdict)) => verdict,
            };

            match verdict {
                Verdict::Pass => {
                    machine.advance(RunState::Persisting, Some("pass"))?;
                    let final_path = match self.store.write_final_artifact(target, &source) {
                        Ok(path) => path,
                        Err(e) => {
                            return Err(self.abort(target, Stage::Persist, index, e.to_string(), log, machine));
                        }
                    };

                    let attempt = log.record(source.clone(), Verdict::Pass, None, source_path);
                    self.write_record(target, attempt);
                    machine.advance(RunState::Succeeded, None)?;

                    info!(
                        target_name = %target,
                        attempt = index,
                        path = %final_path.display(),
                        "Candidate passed; final artifact written"
                    );
                    return Ok(RunResult::succeeded(
                        target.to_string(),
                        log.into_attempts(),
                        source,
                        final_path,
                        machine.into_transitions(),
                        elapsed_ms(started),
                    ));
                }
                Verdict::Fail(failure) => {
                    let reason = failure.category.to_string();
                    machine.advance(RunState::CompilingFeedback, Some(&reason))?;

                    let directive = self.compiler.compile(&failure);
                    warn!(
                        target_name = %target,
                        attempt = index,
                        category = %failure.category,
                        excerpt = %directive.excerpt.lines().next().unwrap_or(""),
                        "Candidate failed validation"
                    );

                    let attempt = log.record(
                        source,
                        Verdict::Fail(failure),
                        Some(directive.clone()),
                        source_path,
                    );
                    self.write_record(target, attempt);
                    history.push(directive);
                }
            }
        }
    }

    /// Run several distinct targets concurrently. Each run owns its own
    /// attempt log and artifact namespace; a repeated target name in the
    /// batch fails with `TargetBusy`.
    pub async fn run_batch(
        &self,
        jobs: &[(TargetSpec, StructuralSummary)],
        max_attempts: u32,
    ) -> Vec<Result<RunResult, RunError>> {
        join_all(
            jobs.iter()
                .map(|(spec, summary)| self.run(spec, summary, max_attempts)),
        )
        .await
    }

    /// Validate with a hard ceiling of `validation_timeout + timeout_grace`,
    /// whatever the validator does with its own budget.
    async fn validate_scoped(
        &self,
        source: &str,
        spec: &TargetSpec,
    ) -> Result<Verdict, CollaboratorError> {
        let budget = self.config.validation_timeout;
        let ceiling = budget + self.config.timeout_grace;

        match tokio::time::timeout(ceiling, self.validator.validate(source, spec, budget)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target_name = %spec.target_name(),
                    budget_secs = budget.as_secs_f64(),
                    "Validator overran its budget; recording timeout"
                );
                Ok(Verdict::Fail(Failure::timeout(budget)))
            }
        }
    }

    /// Sidecar records are forensic only; failing to write one is logged
    /// and the run continues.
    fn write_record(&self, target: &str, attempt: &Attempt) {
        if let Err(e) = self.store.write_attempt_record(target, attempt) {
            warn!(target_name = %target, attempt = attempt.index, error = %e, "Failed to write attempt record");
        }
    }

    fn exhausted(
        &self,
        target: &str,
        log: AttemptLog,
        machine: RunStateMachine,
        started: Instant,
        timed_out: bool,
    ) -> RunResult {
        RunResult::exhausted(
            target.to_string(),
            log.into_attempts(),
            timed_out,
            self.config.exhaustion_policy,
            machine.into_transitions(),
            elapsed_ms(started),
        )
    }

    fn deadline_expired(
        &self,
        target: &str,
        log: AttemptLog,
        mut machine: RunStateMachine,
        started: Instant,
    ) -> Result<RunResult, RunError> {
        machine.advance(RunState::Exhausted, Some("run deadline exceeded"))?;
        warn!(
            target_name = %target,
            attempts = log.len(),
            "Run deadline exceeded"
        );
        Ok(self.exhausted(target, log, machine, started, true))
    }

    fn abort(
        &self,
        target: &str,
        stage: Stage,
        attempt: u32,
        message: String,
        log: AttemptLog,
        mut machine: RunStateMachine,
    ) -> RunError {
        if let Err(e) = machine.abort(&format!("{stage} failed")) {
            return e.into();
        }
        error!(
            target_name = %target,
            attempt,
            stage = %stage,
            error = %message,
            "Run aborted"
        );
        RunError::Infrastructure {
            target: target.to_string(),
            stage,
            attempt,
            message,
            completed: log.into_attempts(),
        }
    }
}
