//! Staging and relocation.
//!
//! Fetched bytes land in a staging root first and are then moved to their
//! destination with bounded retry. A staged file that cannot be moved stays
//! where it is, with an error line in the log pointing at it.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{HarvestError, RelocateError, Result};

/// How often and how patiently to retry a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed sleep between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// One move attempt.
pub trait FileMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `rename`, falling back to copy-then-rename when source and destination are
/// on different filesystems.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMover;

impl FileMover for FsMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        match std::fs::rename(from, to) {
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!(from = %from.display(), to = %to.display(), "Cross-device move, copying");
                copy_across(from, to)
            }
            other => other,
        }
    }
}

/// Copy into a hidden sibling of `to`, then rename it into place and drop the source.
fn copy_across(from: &Path, to: &Path) -> io::Result<()> {
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let partial = to.with_file_name(format!(".{name}.partial"));

    let result = (|| {
        std::fs::copy(from, &partial)?;
        File::open(&partial)?.sync_all()?;
        std::fs::rename(&partial, to)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
        return result;
    }
    std::fs::remove_file(from)
}

/// Writes staged files and relocates them.
pub struct Stager {
    staging_root: PathBuf,
    mover: Box<dyn FileMover>,
}

impl Stager {
    /// A stager using the real filesystem mover.
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self::with_mover(staging_root, Box::new(FsMover))
    }

    /// A stager with a custom move primitive.
    pub fn with_mover(staging_root: impl Into<PathBuf>, mover: Box<dyn FileMover>) -> Self {
        Self {
            staging_root: staging_root.into(),
            mover,
        }
    }

    /// Staging path for a filename.
    pub fn staged_path(&self, filename: &str) -> PathBuf {
        self.staging_root.join(filename)
    }

    /// Write `bytes` under the staging root, replacing any stale file of the same name.
    pub fn write_staged(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.staging_root)
            .map_err(|e| HarvestError::io(&self.staging_root, e))?;

        let path = self.staged_path(filename);
        let mut file = File::create(&path).map_err(|e| HarvestError::io(&path, e))?;
        file.write_all(bytes).map_err(|e| HarvestError::io(&path, e))?;
        file.sync_all().map_err(|e| HarvestError::io(&path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Staged attachment");
        Ok(path)
    }

    /// Move `staged` to `destination`, trying at most `policy.max_attempts` times.
    ///
    /// Returns the number of attempts used. On exhaustion the staged file is
    /// left untouched.
    pub fn relocate(
        &self,
        staged: &Path,
        destination: &Path,
        policy: &RetryPolicy,
    ) -> std::result::Result<u32, RelocateError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.mover.move_file(staged, destination) {
                Ok(()) => {
                    info!(
                        path = %destination.display(),
                        attempt,
                        "Moved attachment into place"
                    );
                    return Ok(attempt);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        staged = %staged.display(),
                        destination = %destination.display(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Move failed, retrying"
                    );
                    if !policy.backoff.is_zero() {
                        std::thread::sleep(policy.backoff);
                    }
                }
                Err(e) => {
                    error!(
                        staged = %staged.display(),
                        destination = %destination.display(),
                        attempts = attempt,
                        error = %e,
                        "Move failed; staged file kept for manual recovery"
                    );
                    return Err(RelocateError::Exhausted {
                        staged: staged.to_path_buf(),
                        destination: destination.to_path_buf(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
