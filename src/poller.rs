//! Periodic release checks on a background task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::coordinator::UpdateCoordinator;
use crate::events::UpdateEvent;

/// Checks for a newer release once after `initial_delay`, then every
/// `interval`, and raises [`UpdateEvent::Available`] when one exists.
///
/// The poller never downloads. Ticks go through the coordinator, so they
/// queue behind any user-triggered operation instead of racing it.
pub struct BackgroundPoller {
    coordinator: Arc<UpdateCoordinator>,
    initial_delay: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl BackgroundPoller {
    pub fn new(coordinator: Arc<UpdateCoordinator>, cancel: CancellationToken) -> Self {
        let initial_delay = coordinator.config().poll_initial_delay;
        let interval = coordinator.config().poll_interval;
        Self {
            coordinator,
            initial_delay,
            interval,
            cancel,
        }
    }

    pub fn with_delays(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run until the cancellation token fires.
    pub async fn run(self) {
        tracing::info!(
            initial_delay = ?self.initial_delay,
            interval = ?self.interval,
            "update poller started"
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("update poller stopped");
                return;
            }
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                // first tick fires immediately, right after the initial delay
                _ = ticker.tick() => {
                    // a tick may queue behind a long user download
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }
        tracing::info!("update poller stopped");
    }

    async fn tick(&self) {
        if !self.coordinator.is_configured() {
            tracing::debug!("no release source configured, skipping poll");
            return;
        }
        if self.coordinator.current_version().await.is_empty() {
            tracing::debug!("current version unknown, skipping poll");
            return;
        }

        let status = self.coordinator.check("").await;
        if let Some(error) = &status.error {
            tracing::debug!(error = %error, "background check failed");
            return;
        }
        if status.available {
            tracing::info!(tag = %status.latest_version, "update available");
            self.coordinator.emit(UpdateEvent::Available {
                tag: status.latest_version,
            });
        }
    }
}
