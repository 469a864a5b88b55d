//! The swap watchdog: an independent process that waits for the host to
//! exit, swaps in the staged binary and relaunches the result.
//!
//! ```text
//! WaitForParent ──timeout──▶ Abort (no file touched)
//!       │
//!       ▼
//! SwapOrPassthrough ──no staging file──▶ Relaunch
//!       │
//!       ▼
//!     Swap ──step 2 failed──▶ Rollback ──▶ Relaunch (original)
//!       │
//!       ▼
//!   Relaunch (new binary)
//! ```
//!
//! Runs synchronously; the watchdog binary has nothing else to do.

mod resolve;
mod swap;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use resolve::resolve_target;
pub use swap::{backup_path, swap, Backoff, FileOps, StdFileOps, SwapFailure, SwapStep};

use crate::error::UpdateError;
use crate::plan::SwapPlan;
use crate::process::{
    shell_open_command, DetachedSpawner, ProcessProbe, SystemProbe, SystemSpawner, Visibility,
};

/// Terminal result of one watchdog run.
#[derive(Debug)]
pub enum WatchdogOutcome {
    /// New binary installed and started.
    Swapped { launched: PathBuf },
    /// No staged file; the existing target was started unchanged.
    Passthrough { launched: PathBuf },
    /// Install failed, the original was restored and started.
    RolledBack {
        launched: PathBuf,
        error: UpdateError,
    },
    /// Nothing was started. The original binary is left runnable.
    Failed(UpdateError),
}

impl WatchdogOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            WatchdogOutcome::Swapped { .. } | WatchdogOutcome::Passthrough { .. }
        )
    }

    pub fn launched(&self) -> Option<&Path> {
        match self {
            WatchdogOutcome::Swapped { launched }
            | WatchdogOutcome::Passthrough { launched }
            | WatchdogOutcome::RolledBack { launched, .. } => Some(launched),
            WatchdogOutcome::Failed(_) => None,
        }
    }
}

pub struct Watchdog {
    fs: Arc<dyn FileOps>,
    probe: Arc<dyn ProcessProbe>,
    spawner: Arc<dyn DetachedSpawner>,
    self_exe: Option<PathBuf>,
    settle_delay: Duration,
    poll_interval: Duration,
    backoff: Backoff,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Watchdog wired to the real filesystem and OS.
    pub fn new() -> Self {
        Self {
            fs: Arc::new(StdFileOps),
            probe: Arc::new(SystemProbe),
            spawner: Arc::new(SystemSpawner),
            self_exe: std::env::current_exe().ok(),
            settle_delay: Duration::from_millis(300),
            poll_interval: Duration::from_millis(100),
            backoff: Backoff::default(),
        }
    }

    pub fn with_file_ops(mut self, fs: Arc<dyn FileOps>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn DetachedSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Path of the watchdog binary, excluded when scanning for a target.
    pub fn with_self_exe(mut self, path: Option<PathBuf>) -> Self {
        self.self_exe = path;
        self
    }

    /// Pause between the parent exiting and the first rename.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Drive one plan to a terminal state.
    pub fn run(&self, plan: &SwapPlan) -> WatchdogOutcome {
        let deadline = Instant::now() + plan.max_wait;
        tracing::info!(
            pid = plan.parent_pid,
            target = %plan.target_exe.display(),
            staging = %plan.staging_path.display(),
            max_wait = ?plan.max_wait,
            "watchdog started"
        );

        if !self.wait_for_parent(plan.parent_pid, deadline) {
            let err = UpdateError::SwapTimeout(plan.max_wait);
            tracing::error!(error = %err, "aborting, no files touched");
            return WatchdogOutcome::Failed(err);
        }
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        if !self.fs.exists(&plan.staging_path) {
            tracing::info!("no staged update, passing through");
            return match self.relaunch(&plan.target_exe) {
                Ok(launched) => WatchdogOutcome::Passthrough { launched },
                Err(e) => WatchdogOutcome::Failed(e),
            };
        }

        match swap(
            self.fs.as_ref(),
            self.backoff,
            &plan.target_exe,
            &plan.staging_path,
            deadline,
        ) {
            Ok(()) => {
                tracing::info!(target = %plan.target_exe.display(), "swap complete");
                match self.relaunch(&plan.target_exe) {
                    Ok(launched) => WatchdogOutcome::Swapped { launched },
                    Err(e) => WatchdogOutcome::Failed(e),
                }
            }
            Err(SwapFailure::RolledBack(error)) => match self.relaunch(&plan.target_exe) {
                Ok(launched) => WatchdogOutcome::RolledBack { launched, error },
                Err(e) => WatchdogOutcome::Failed(e),
            },
            Err(SwapFailure::Untouched(error)) => {
                tracing::error!(error = %error, "swap not started, original left in place");
                WatchdogOutcome::Failed(error)
            }
            Err(SwapFailure::RollbackFailed { install, rollback }) => {
                tracing::error!(
                    install = %install,
                    rollback = %rollback,
                    backup = %backup_path(&plan.target_exe).display(),
                    "swap and rollback failed, start the application manually"
                );
                WatchdogOutcome::Failed(rollback)
            }
        }
    }

    /// Returns `false` if the parent is still alive at `deadline`.
    fn wait_for_parent(&self, pid: u32, deadline: Instant) -> bool {
        if pid == 0 {
            return true;
        }
        loop {
            if !self.probe.is_running(pid) {
                tracing::info!(pid, "parent exited");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn relaunch(&self, configured: &Path) -> Result<PathBuf, UpdateError> {
        let target = resolve_target(configured, self.self_exe.as_deref());
        tracing::info!(path = %target.display(), "relaunching");

        let direct = match self.spawner.spawn_detached(&target, &[], Visibility::Visible) {
            Ok(pid) => {
                tracing::info!(pid, "relaunched");
                return Ok(target);
            }
            Err(e) => e,
        };

        tracing::warn!(error = %direct, "direct launch failed, asking the desktop shell");
        let (program, args) = shell_open_command(&target);
        match self.spawner.spawn_detached(&program, &args, Visibility::Hidden) {
            Ok(pid) => {
                tracing::info!(pid, "relaunched via shell");
                Ok(target)
            }
            Err(fallback) => {
                let err = UpdateError::Relaunch(format!(
                    "{}: {direct}; shell fallback: {fallback}",
                    target.display()
                ));
                tracing::error!(error = %err, "relaunch failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::sync::Mutex;

    use super::swap::tests::{fast_backoff, FlakyFs};
    use super::*;
    use crate::error::Result;
    use crate::platform;

    #[derive(Default)]
    struct RecordingSpawner {
        calls: Mutex<Vec<PathBuf>>,
        fail_first: bool,
        fail_all: bool,
    }

    impl DetachedSpawner for RecordingSpawner {
        fn spawn_detached(&self, program: &Path, _: &[OsString], _: Visibility) -> Result<u32> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(program.to_path_buf());
            if self.fail_all || (self.fail_first && calls.len() == 1) {
                return Err(UpdateError::Spawn {
                    program: program.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "nope"),
                });
            }
            Ok(1000 + calls.len() as u32)
        }
    }

    struct AlwaysRunning;
    impl ProcessProbe for AlwaysRunning {
        fn is_running(&self, _: u32) -> bool {
            true
        }
    }

    struct ExitsAfter(Mutex<u32>);
    impl ProcessProbe for ExitsAfter {
        fn is_running(&self, _: u32) -> bool {
            let mut left = self.0.lock().unwrap();
            if *left == 0 {
                return false;
            }
            *left -= 1;
            true
        }
    }

    fn fixture(max_wait: Duration) -> (tempfile::TempDir, SwapPlan) {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(format!("goods_app{}", platform::exe_suffix()));
        std::fs::write(&target, b"old-binary").unwrap();
        platform::set_executable(&target).unwrap();
        let staging = platform::with_suffix(&target, ".pending");
        std::fs::write(&staging, b"new-binary").unwrap();
        let plan = SwapPlan {
            parent_pid: 4242,
            target_exe: target,
            staging_path: staging,
            max_wait,
            log_path: dir.path().join("launcher.log"),
        };
        (dir, plan)
    }

    fn watchdog(spawner: Arc<RecordingSpawner>) -> Watchdog {
        Watchdog::new()
            .with_probe(Arc::new(ExitsAfter(Mutex::new(2))))
            .with_spawner(spawner)
            .with_self_exe(None)
            .with_settle_delay(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(5))
            .with_backoff(fast_backoff())
    }

    #[test]
    fn test_swap_then_relaunch() {
        let (_dir, plan) = fixture(Duration::from_secs(5));
        let spawner = Arc::new(RecordingSpawner::default());
        let outcome = watchdog(spawner.clone()).run(&plan);

        assert!(matches!(outcome, WatchdogOutcome::Swapped { .. }));
        assert_eq!(std::fs::read(&plan.target_exe).unwrap(), b"new-binary");
        assert_eq!(*spawner.calls.lock().unwrap(), vec![plan.target_exe.clone()]);
    }

    #[test]
    fn test_passthrough_without_staging() {
        let (_dir, plan) = fixture(Duration::from_secs(5));
        std::fs::remove_file(&plan.staging_path).unwrap();
        let spawner = Arc::new(RecordingSpawner::default());
        let outcome = watchdog(spawner.clone()).run(&plan);

        assert!(matches!(outcome, WatchdogOutcome::Passthrough { .. }));
        assert_eq!(std::fs::read(&plan.target_exe).unwrap(), b"old-binary");
        assert_eq!(outcome.launched(), Some(plan.target_exe.as_path()));
    }

    #[test]
    fn test_timeout_touches_nothing() {
        let (_dir, plan) = fixture(Duration::from_millis(50));
        let spawner = Arc::new(RecordingSpawner::default());
        let outcome = watchdog(spawner.clone())
            .with_probe(Arc::new(AlwaysRunning))
            .run(&plan);

        assert!(matches!(outcome, WatchdogOutcome::Failed(UpdateError::SwapTimeout(_))));
        assert_eq!(std::fs::read(&plan.target_exe).unwrap(), b"old-binary");
        assert_eq!(std::fs::read(&plan.staging_path).unwrap(), b"new-binary");
        assert!(spawner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_relaunches_original() {
        let (_dir, plan) = fixture(Duration::from_millis(100));
        let spawner = Arc::new(RecordingSpawner::default());
        let fs = FlakyFs::default().fail_always(&plan.staging_path);
        let outcome = watchdog(spawner.clone())
            .with_file_ops(Arc::new(fs))
            .run(&plan);

        assert!(matches!(outcome, WatchdogOutcome::RolledBack { .. }));
        assert!(!outcome.is_success());
        assert_eq!(std::fs::read(&plan.target_exe).unwrap(), b"old-binary");
        assert!(!backup_path(&plan.target_exe).exists());
        assert_eq!(spawner.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_transient_lock_shorter_than_max_wait() {
        let (_dir, plan) = fixture(Duration::from_secs(5));
        let spawner = Arc::new(RecordingSpawner::default());
        let fs = FlakyFs::default().fail_times(&plan.target_exe, 5);
        let outcome = watchdog(spawner)
            .with_file_ops(Arc::new(fs))
            .run(&plan);

        assert!(outcome.is_success());
        assert_eq!(std::fs::read(&plan.target_exe).unwrap(), b"new-binary");
    }

    #[test]
    fn test_shell_fallback_after_direct_launch_fails() {
        let (_dir, plan) = fixture(Duration::from_secs(5));
        let spawner = Arc::new(RecordingSpawner {
            fail_first: true,
            ..RecordingSpawner::default()
        });
        let outcome = watchdog(spawner.clone()).run(&plan);

        assert!(matches!(outcome, WatchdogOutcome::Swapped { .. }));
        let calls = spawner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], shell_open_command(&plan.target_exe).0);
    }

    #[test]
    fn test_relaunch_failure_is_reported() {
        let (_dir, plan) = fixture(Duration::from_secs(5));
        let spawner = Arc::new(RecordingSpawner {
            fail_all: true,
            ..RecordingSpawner::default()
        });
        let outcome = watchdog(spawner).run(&plan);

        assert!(matches!(outcome, WatchdogOutcome::Failed(UpdateError::Relaunch(_))));
        // the swap itself still landed
        assert_eq!(std::fs::read(&plan.target_exe).unwrap(), b"new-binary");
    }

    #[test]
    fn test_zero_pid_skips_waiting() {
        let (_dir, mut plan) = fixture(Duration::from_millis(50));
        plan.parent_pid = 0;
        let spawner = Arc::new(RecordingSpawner::default());
        let outcome = watchdog(spawner)
            .with_probe(Arc::new(AlwaysRunning))
            .run(&plan);
        assert!(matches!(outcome, WatchdogOutcome::Swapped { .. }));
    }
}
