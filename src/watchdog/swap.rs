//! Three-step binary swap with retry and rollback.
//!
//! 1. `target` → `target.old`
//! 2. `staging` → `target`
//! 3. delete `target.old`
//!
//! Once step 1 has landed, a runnable file is kept at `target`: either the
//! new binary or, after a failed step 2, the restored original.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::UpdateError;
use crate::platform;

/// Extra time granted to put the original back after the deadline passed.
const ROLLBACK_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStep {
    Backup,
    Install,
    Cleanup,
    Rollback,
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapStep::Backup => write!(f, "backup (target -> target.old)"),
            SwapStep::Install => write!(f, "install (staging -> target)"),
            SwapStep::Cleanup => write!(f, "cleanup (remove target.old)"),
            SwapStep::Rollback => write!(f, "rollback (target.old -> target)"),
        }
    }
}

/// Filesystem operations used by the swap.
pub trait FileOps: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// [`FileOps`] on the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Exponential backoff between rename attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(2),
        }
    }
}

/// Why a swap did not complete.
#[derive(Debug)]
pub enum SwapFailure {
    /// Step 1 never landed; the original is untouched.
    Untouched(UpdateError),
    /// Step 2 failed and the original was put back.
    RolledBack(UpdateError),
    /// Step 2 failed and so did the rollback. `target.old` holds the original.
    RollbackFailed {
        install: UpdateError,
        rollback: UpdateError,
    },
}

pub fn backup_path(target: &Path) -> PathBuf {
    platform::with_suffix(target, ".old")
}

/// Run the swap. `deadline` bounds retries of steps 1 and 2.
pub fn swap(
    fs: &dyn FileOps,
    backoff: Backoff,
    target: &Path,
    staging: &Path,
    deadline: Instant,
) -> Result<(), SwapFailure> {
    let old = backup_path(target);

    if fs.exists(&old) {
        if fs.exists(target) {
            if let Err(e) = fs.remove_file(&old) {
                tracing::warn!(path = %old.display(), error = %e, "could not remove stale backup");
            }
        } else {
            // an earlier rollback failed; the backup is the only original left
            tracing::warn!(backup = %old.display(), "target missing, restoring backup first");
            rename_with_retry(fs, backoff, SwapStep::Rollback, &old, target, deadline)
                .map_err(SwapFailure::Untouched)?;
        }
    }

    let had_target = fs.exists(target);
    if had_target {
        rename_with_retry(fs, backoff, SwapStep::Backup, target, &old, deadline)
            .map_err(SwapFailure::Untouched)?;
        tracing::info!(step = %SwapStep::Backup, "swap step complete");
    } else {
        tracing::warn!(target = %target.display(), "target missing, installing without backup");
    }

    if let Err(install) = rename_with_retry(fs, backoff, SwapStep::Install, staging, target, deadline)
    {
        if !had_target {
            return Err(SwapFailure::Untouched(install));
        }
        tracing::error!(error = %install, "install failed, rolling back");
        let grace = Instant::now().max(deadline) + ROLLBACK_GRACE;
        return match rename_with_retry(fs, backoff, SwapStep::Rollback, &old, target, grace) {
            Ok(()) => {
                tracing::info!(target = %target.display(), "original binary restored");
                Err(SwapFailure::RolledBack(install))
            }
            Err(rollback) => {
                tracing::error!(
                    error = %rollback,
                    backup = %old.display(),
                    "rollback failed, original binary left at backup path"
                );
                Err(SwapFailure::RollbackFailed { install, rollback })
            }
        };
    }
    tracing::info!(step = %SwapStep::Install, "swap step complete");

    if had_target {
        match fs.remove_file(&old) {
            Ok(()) => tracing::info!(step = %SwapStep::Cleanup, "swap step complete"),
            Err(e) => tracing::warn!(
                step = %SwapStep::Cleanup,
                error = %e,
                "could not remove backup, it will be replaced on the next swap"
            ),
        }
    }

    Ok(())
}

fn rename_with_retry(
    fs: &dyn FileOps,
    backoff: Backoff,
    step: SwapStep,
    from: &Path,
    to: &Path,
    deadline: Instant,
) -> Result<(), UpdateError> {
    let mut delay = backoff.initial;
    let mut attempt: u32 = 1;
    loop {
        match fs.rename(from, to) {
            Ok(()) => return Ok(()),
            // a missing source will not reappear by waiting
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UpdateError::SwapIo { step, source: e });
            }
            Err(e) => {
                let now = Instant::now();
                if now >= deadline {
                    tracing::error!(%step, attempt, error = %e, "giving up, deadline reached");
                    return Err(UpdateError::SwapIo { step, source: e });
                }
                tracing::warn!(%step, attempt, error = %e, retry_in = ?delay, "rename failed");
                std::thread::sleep(delay.min(deadline - now));
                delay = (delay * 2).min(backoff.max);
                attempt += 1;
            }
        }
    }
}
