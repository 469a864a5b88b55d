//! In-process orchestration of check → download → plan-apply.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::UpdaterConfig;
use crate::download::Downloader;
use crate::error::{Result, UpdateError};
use crate::events::UpdateEvent;
use crate::plan::SwapPlan;
use crate::process::{DetachedSpawner, SystemSpawner, Visibility};
use crate::release::ReleaseChecker;
use crate::state::{UpdateState, UpdateStatus};

/// Delay between a successful apply request and host shutdown, so the
/// reply still reaches the caller.
const APPLY_GRACE: Duration = Duration::from_millis(200);

/// Owns the update state and serializes every lifecycle operation.
///
/// `check`, `download` and `plan_apply_on_exit` all hold the same
/// single-flight guard for their whole duration, so a poller tick cannot
/// interleave with a user-triggered download and a swap is never planned
/// against a half-written staging file.
pub struct UpdateCoordinator {
    config: UpdaterConfig,
    checker: ReleaseChecker,
    downloader: Downloader,
    spawner: Arc<dyn DetachedSpawner>,
    target_exe: PathBuf,
    state: Mutex<UpdateState>,
    lifecycle: Mutex<()>,
    events: broadcast::Sender<UpdateEvent>,
    shutdown: CancellationToken,
}

impl UpdateCoordinator {
    pub fn new(config: UpdaterConfig) -> Result<Self> {
        Self::with_spawner(config, Arc::new(SystemSpawner))
    }

    pub fn with_spawner(config: UpdaterConfig, spawner: Arc<dyn DetachedSpawner>) -> Result<Self> {
        config.validate()?;
        let client = config.http_client()?;
        let target_exe = config.resolve_target_exe()?;
        let checker = ReleaseChecker::with_client(client.clone(), &config)?;
        let downloader = Downloader::new(client, config.staging_path(&target_exe));
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            config,
            checker,
            downloader,
            spawner,
            target_exe,
            state: Mutex::new(UpdateState::default()),
            lifecycle: Mutex::new(()),
            events,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn target_exe(&self) -> &Path {
        &self.target_exe
    }

    pub fn staging_path(&self) -> &Path {
        self.downloader.staging_path()
    }

    /// Whether a release source is configured at all.
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }

    /// Token cancelled when the host should shut down. In-flight network
    /// calls observe it and abort.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn emit(&self, event: UpdateEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Record the running version, typically from build metadata.
    pub async fn set_current_version(&self, version: impl Into<String>) {
        self.state.lock().await.current_version = version.into();
    }

    pub async fn current_version(&self) -> String {
        self.state.lock().await.current_version.clone()
    }

    pub async fn status(&self) -> UpdateStatus {
        self.state.lock().await.snapshot()
    }

    /// Ask the release service for the latest release.
    ///
    /// A non-empty `declared_version` replaces the stored current version.
    /// Failures are reported in the returned status, never raised.
    pub async fn check(&self, declared_version: &str) -> UpdateStatus {
        self.check_with(declared_version, &CancellationToken::new()).await
    }

    /// [`check`](Self::check) that also stops when `cancel` fires, including
    /// while queued behind another lifecycle operation. Only this call is
    /// affected; later calls run normally.
    pub async fn check_with(&self, declared_version: &str, cancel: &CancellationToken) -> UpdateStatus {
        let run = async {
            let _flight = self.lifecycle.lock().await;
            self.check_locked(declared_version).await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => self.cancelled("check").await,
            status = run => status,
        }
    }

    async fn cancelled(&self, operation: &str) -> UpdateStatus {
        tracing::info!(operation, "update operation cancelled");
        self.state
            .lock()
            .await
            .failure(UpdateError::Cancelled.to_string())
    }

    async fn check_locked(&self, declared_version: &str) -> UpdateStatus {
        if !declared_version.is_empty() {
            self.state.lock().await.current_version = declared_version.to_string();
        }

        let result = if self.config.is_configured() {
            self.checker.check_latest(&self.shutdown).await
        } else {
            Err(UpdateError::Config(
                "owner and repo must be set to check for updates".into(),
            ))
        };

        let mut state = self.state.lock().await;
        match result {
            Ok(latest) => {
                state.record_release(&latest);
                let status = state.snapshot();
                tracing::info!(
                    current = %status.current_version,
                    latest = %status.latest_version,
                    available = status.available,
                    "update check complete"
                );
                status
            }
            Err(e) => {
                tracing::warn!(error = %e, endpoint = %self.checker.endpoint(), "update check failed");
                state.failure(e.to_string())
            }
        }
    }

    /// Download the latest asset into the staging file.
    ///
    /// Runs an implicit check when nothing is cached yet. With no release or
    /// no asset the result is `available = false` without an error.
    pub async fn download(&self) -> UpdateStatus {
        self.download_with(&CancellationToken::new()).await
    }

    /// [`download`](Self::download) that also stops when `cancel` fires. The
    /// partial file is removed and the previous staging file, if any, is kept.
    pub async fn download_with(&self, cancel: &CancellationToken) -> UpdateStatus {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => self.cancelled("download").await,
            status = self.download_locked() => status,
        }
    }

    async fn download_locked(&self) -> UpdateStatus {
        let _flight = self.lifecycle.lock().await;

        let cached = !self.state.lock().await.latest_asset_url.is_empty();
        if !cached {
            let status = self.check_locked("").await;
            if status.error.is_some() {
                return status;
            }
        }

        let (url, mut status) = {
            let state = self.state.lock().await;
            (state.latest_asset_url.clone(), state.snapshot())
        };
        if url.is_empty() {
            status.available = false;
            return status;
        }

        let events = self.events.clone();
        let result = self
            .downloader
            .download_to_staging(&url, &self.shutdown, |progress| {
                let _ = events.send(UpdateEvent::Progress(progress));
            })
            .await;

        let mut state = self.state.lock().await;
        match result {
            Ok(path) => {
                state.downloaded = true;
                state.last_error = None;
                self.emit(UpdateEvent::Downloaded { path });
                UpdateStatus {
                    available: true,
                    downloaded: true,
                    ..state.snapshot()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "update download failed");
                state.last_error = Some(e.to_string());
                UpdateStatus {
                    available: true,
                    error: Some(e.to_string()),
                    ..state.snapshot()
                }
            }
        }
    }

    /// Hand the staged update to a detached watchdog that swaps it in once
    /// this process exits.
    ///
    /// Safe to call again before exiting; the plan is simply rewritten.
    pub async fn plan_apply_on_exit(&self) -> Result<SwapPlan> {
        let _flight = self.lifecycle.lock().await;

        let staging = self.staging_path().to_path_buf();
        if !tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            return Err(UpdateError::NoPendingUpdate(staging));
        }

        let plan = SwapPlan {
            parent_pid: std::process::id(),
            target_exe: self.target_exe.clone(),
            staging_path: staging,
            max_wait: self.config.max_wait,
            log_path: self.config.watchdog_log_path(&self.target_exe),
        };
        let plan_file = SwapPlan::plan_file_for(&self.target_exe);
        plan.write(&plan_file)?;

        let watchdog = self.config.watchdog_path(&self.target_exe);
        let pid = match self.spawner.spawn_detached(
            &watchdog,
            &SwapPlan::watchdog_args(&plan_file),
            Visibility::Hidden,
        ) {
            Ok(pid) => pid,
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&plan_file) {
                    tracing::warn!(path = %plan_file.display(), error = %rm, "could not remove swap plan");
                }
                return Err(e);
            }
        };
        tracing::info!(
            watchdog = %watchdog.display(),
            pid,
            plan = %plan_file.display(),
            "swap planned for exit"
        );
        Ok(plan)
    }

    /// Plan the swap, then signal host shutdown after a short grace period.
    pub async fn apply_and_restart(&self) -> Result<()> {
        self.plan_apply_on_exit().await?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(APPLY_GRACE).await;
            shutdown.cancel();
        });
        Ok(())
    }
}
