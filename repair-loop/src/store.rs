//! Artifact store
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<target>_parser.py                  final artifact, written only on success
//! <root>/attempts/<target>/attempt-NN.py     candidate, written before validation
//! <root>/attempts/<target>/attempt-NN.json   verdict + feedback once known
//! <root>/.locks/<target>.lock                OS-locked for the duration of a run
//! ```

use crate::attempt::Attempt;
use crate::error::StoreError;
use std::fs::{self, File, OpenOptions};
use fs2::FileExt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Filesystem home for attempt candidates and final artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn attempts_dir(&self, target: &str) -> PathBuf {
        self.root.join("attempts").join(target)
    }

    pub fn attempt_source_path(&self, target: &str, index: u32) -> PathBuf {
        self.attempts_dir(target)
            .join(format!("attempt-{:02}.py", index))
    }

    pub fn attempt_record_path(&self, target: &str, index: u32) -> PathBuf {
        self.attempts_dir(target)
            .join(format!("attempt-{:02}.json", index))
    }

    pub fn final_artifact_path(&self, target: &str) -> PathBuf {
        self.root.join(format!("{}_parser.py", target))
    }

    fn lock_path(&self, target: &str) -> PathBuf {
        self.root.join(".locks").join(format!("{}.lock", target))
    }

    /// Take the exclusive per-target lock. Fails with `Busy` while another
    /// run (in this or any other process) holds it.
    ///
    /// The lock is an advisory OS lock on the lock file, so a run that dies
    /// without cleaning up does not block later runs.
    pub fn lock(&self, target: &str) -> Result<TargetLock, StoreError> {
        let path = self.lock_path(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err(&path))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(StoreError::Busy {
                    target: target.to_string(),
                    path,
                });
            }
            return Err(StoreError::Io { path, source: e });
        }

        // Owner pid, for operators inspecting the lock directory.
        file.set_len(0).map_err(io_err(&path))?;
        writeln!(file, "{}", std::process::id()).map_err(io_err(&path))?;
        Ok(TargetLock { path, file })
    }

    /// Remove candidates left over from an earlier run of this target.
    pub fn reset_attempts(&self, target: &str) -> Result<(), StoreError> {
        let dir = self.attempts_dir(target);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io { path: dir, source: e }),
        }
    }

    pub fn write_attempt_source(
        &self,
        target: &str,
        index: u32,
        source: &str,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.attempts_dir(target);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let path = self.attempt_source_path(target, index);
        fs::write(&path, source).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Write the JSON sidecar for a finished attempt.
    pub fn write_attempt_record(&self, target: &str, attempt: &Attempt) -> Result<PathBuf, StoreError> {
        let path = self.attempt_record_path(target, attempt.index);
        let json = serde_json::to_string_pretty(attempt)?;
        fs::write(&path, json).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Atomically replace the final artifact (temp file + rename).
    pub fn write_final_artifact(&self, target: &str, source: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;

        let path = self.final_artifact_path(target);
        let tmp = self.root.join(format!(".{}_parser.py.tmp", target));
        fs::write(&tmp, source).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(path)
    }
}

/// Exclusive claim on a target's artifact namespace; released on drop.
#[derive(Debug)]
pub struct TargetLock {
    path: PathBuf,
    file: File,
}

impl TargetLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        // The file stays behind; removing it would race a waiting run.
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release target lock");
        }
    }
}
