//! One-way notifications raised to the host.

use std::path::PathBuf;

use crate::download::Progress;

/// Event broadcast by the coordinator and the background poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// Bytes copied so far during a download.
    Progress(Progress),
    /// The staging file is complete.
    Downloaded { path: PathBuf },
    /// The poller found a newer release. Nothing is downloaded automatically.
    Available { tag: String },
}

impl UpdateEvent {
    /// Event name on the host's notification channel.
    pub fn name(&self) -> &'static str {
        match self {
            UpdateEvent::Progress(_) => "update:progress",
            UpdateEvent::Downloaded { .. } => "update:downloaded",
            UpdateEvent::Available { .. } => "update:available",
        }
    }
}
