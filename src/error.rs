use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::watchdog::SwapStep;

/// Errors produced by the self-update subsystem.
///
/// "No release published yet" and "no asset matched the pattern" are not
/// errors; they surface as data on [`crate::LatestRelease`].
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Release service answered with a non-2xx status other than 404.
    #[error("release service returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Release service unreachable or returned an undecodable body.
    #[error("network error: {0}")]
    Network(String),

    /// Transport failure or bad status while fetching the artifact.
    #[error("download failed: {0}")]
    Download(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no pending update at {}", .0.display())]
    NoPendingUpdate(PathBuf),

    #[error("parent process did not exit within {0:?}")]
    SwapTimeout(Duration),

    #[error("swap step '{step}' failed: {source}")]
    SwapIo {
        step: SwapStep,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("relaunch failed: {0}")]
    Relaunch(String),

    #[error("unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl UpdateError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpdateError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
