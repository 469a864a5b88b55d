//! In-memory update state and the status snapshot handed to the host.

use serde::{Deserialize, Serialize};

use crate::release::LatestRelease;
use crate::version;

/// Process-wide update state, owned by the coordinator.
///
/// Nothing here is persisted; a restart starts from scratch. `downloaded`
/// is only set after the staging file was written, but an external actor
/// may delete that file afterwards and the flag is not reconciled until the
/// next download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateState {
    pub current_version: String,
    pub latest_tag: String,
    pub latest_asset_url: String,
    pub downloaded: bool,
    pub last_error: Option<String>,
}

impl UpdateState {
    pub fn record_release(&mut self, latest: &LatestRelease) {
        self.latest_tag = latest.tag.clone();
        self.latest_asset_url = latest.asset_url.clone();
        self.last_error = None;
    }

    /// Whether the cached tag is newer than the running version.
    pub fn is_update_available(&self) -> bool {
        !self.latest_tag.is_empty()
            && !self.current_version.is_empty()
            && version::is_newer(&self.current_version, &self.latest_tag)
    }

    pub fn snapshot(&self) -> UpdateStatus {
        UpdateStatus {
            current_version: self.current_version.clone(),
            latest_version: self.latest_tag.clone(),
            available: self.is_update_available(),
            downloaded: self.downloaded,
            error: None,
        }
    }

    /// Status carrying only the running version and an error.
    pub fn failure(&mut self, error: String) -> UpdateStatus {
        self.last_error = Some(error.clone());
        UpdateStatus {
            current_version: self.current_version.clone(),
            error: Some(error),
            ..UpdateStatus::default()
        }
    }
}

/// Snapshot returned by every host-facing operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub current_version: String,
    pub latest_version: String,
    pub available: bool,
    pub downloaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
