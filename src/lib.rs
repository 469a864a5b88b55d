//! # a3s-selfupdate
//!
//! Self-update for desktop applications: find a newer release, stage it
//! beside the running binary, and swap it in after the host exits.
//!
//! ## Overview
//!
//! A running executable cannot reliably overwrite itself, so the swap is
//! handed to a detached watchdog process (`a3s-swap-watchdog`). The host
//! writes a [`SwapPlan`], spawns the watchdog, and quits. The watchdog waits
//! for the host's pid to disappear, renames `target → target.old`,
//! `staging → target`, removes the backup, and relaunches the application.
//! A failed install step rolls the original back into place.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use a3s_selfupdate::{BackgroundPoller, UpdateCoordinator, UpdaterConfig};
//!
//! # async fn example() -> a3s_selfupdate::Result<()> {
//! let coordinator = Arc::new(UpdateCoordinator::new(UpdaterConfig::new("A3S-Lab", "goods_app"))?);
//! coordinator.set_current_version("1.0.0").await;
//!
//! let status = coordinator.check("").await;
//! if status.available {
//!     let status = coordinator.download().await;
//!     if status.downloaded {
//!         coordinator.apply_and_restart().await?;
//!     }
//! }
//!
//! // or let the poller announce releases as they appear
//! BackgroundPoller::new(coordinator.clone(), coordinator.shutdown_token()).spawn();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **version**: lenient ordering of version tags
//! - **ReleaseChecker**: latest-release metadata and asset selection
//! - **Downloader**: streaming download into a staging file with progress
//! - **UpdateCoordinator**: state, events and the check/download/apply lifecycle
//! - **BackgroundPoller**: periodic checks that raise `update:available`
//! - **Watchdog**: the out-of-process wait/swap/rollback/relaunch state machine

pub mod config;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod events;
pub mod plan;
pub mod platform;
pub mod poller;
pub mod process;
pub mod release;
pub mod state;
pub mod version;
pub mod watchdog;

// Re-export core types
pub use config::UpdaterConfig;
pub use coordinator::UpdateCoordinator;
pub use download::{Downloader, Progress};
pub use error::{Result, UpdateError};
pub use events::UpdateEvent;
pub use plan::SwapPlan;
pub use poller::BackgroundPoller;
pub use process::{DetachedSpawner, ProcessProbe, SystemProbe, SystemSpawner, Visibility};
pub use release::{Asset, LatestRelease, Release, ReleaseChecker};
pub use state::{UpdateState, UpdateStatus};
pub use version::is_newer;
pub use watchdog::{Watchdog, WatchdogOutcome};
