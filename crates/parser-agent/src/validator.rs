//! Subprocess validator
//!
//! Each candidate runs in a fresh scratch directory under its own Python
//! process, driven by [`VALIDATION_HARNESS`]. The process is killed if it
//! outlives the budget.

use crate::harness::{marker_payload, VALIDATION_HARNESS};
use async_trait::async_trait;
use repair_loop::feedback::{classify, HarnessOutput, HarnessRecord};
use repair_loop::{CollaboratorError, TargetSpec, Validator, Verdict};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

const COLLABORATOR: &str = "validator";

/// Stderr kept from a run before classification
const STDERR_MAX_BYTES: usize = 16 * 1024;

pub struct PythonValidator {
    python: String,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Column name to the pandas dtype the candidate must produce.
fn column_dtypes(spec: &TargetSpec) -> serde_json::Value {
    spec.schema()
        .iter()
        .map(|c| (c.name.clone(), serde_json::Value::from(c.semantic_type.pandas_dtype())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn truncate_lossy(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return text.into_owned();
    }
    // Keep the tail: the innermost exception is printed last.
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

impl PythonValidator {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Run the harness against `module` and capture its output.
    async fn run_harness(
        &self,
        workdir: &Path,
        module: &Path,
        spec: &TargetSpec,
        timeout: Duration,
    ) -> Result<HarnessOutput, CollaboratorError> {
        let harness = workdir.join("parser_harness.py");
        tokio::fs::write(&harness, VALIDATION_HARNESS)
            .await
            .map_err(|e| CollaboratorError::unavailable(COLLABORATOR, format!("cannot write harness: {e}")))?;

        let columns = serde_json::to_string(&spec.column_names())
            .map_err(|e| CollaboratorError::crashed(COLLABORATOR, e.to_string()))?;
        let dtypes = column_dtypes(spec).to_string();

        let mut cmd = tokio::process::Command::new(&self.python);
        cmd.arg(&harness)
            .arg(module)
            .arg(absolute(spec.sample_input()))
            .arg(absolute(spec.sample_output()))
            .arg(columns)
            .arg(dtypes)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so anything the candidate spawns dies with it.
        #[cfg(unix)]
        cmd.process_group(0);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(HarnessOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: truncate_lossy(&output.stderr, STDERR_MAX_BYTES),
                timed_out: false,
                budget: timeout,
            }),
            Ok(Err(e)) => Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("failed to run {}: {e}", self.python),
            )),
            Err(_) => Ok(HarnessOutput {
                timed_out: true,
                budget: timeout,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl Validator for PythonValidator {
    async fn validate(
        &self,
        source: &str,
        spec: &TargetSpec,
        timeout: Duration,
    ) -> Result<Verdict, CollaboratorError> {
        let workdir = tempfile::Builder::new()
            .prefix("parser-validate-")
            .tempdir()
            .map_err(|e| CollaboratorError::unavailable(COLLABORATOR, format!("cannot create scratch dir: {e}")))?;

        let module = workdir.path().join(format!("{}_parser.py", spec.target_name()));
        tokio::fs::write(&module, source)
            .await
            .map_err(|e| CollaboratorError::unavailable(COLLABORATOR, format!("cannot write candidate: {e}")))?;

        let output = self.run_harness(workdir.path(), &module, spec, timeout).await?;
        debug!(
            target_name = %spec.target_name(),
            exit_code = ?output.exit_code,
            timed_out = output.timed_out,
            "Harness finished"
        );

        if let Some(payload) = marker_payload(&output.stdout) {
            if let Ok(HarnessRecord::HarnessError { message }) =
                serde_json::from_str::<HarnessRecord>(payload)
            {
                warn!(target_name = %spec.target_name(), error = %message, "Validation harness failed");
                return Err(CollaboratorError::crashed(COLLABORATOR, message));
            }
        }

        Ok(classify(&output))
    }
}
