//! The hand-off descriptor between the host and the swap watchdog.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_serde;
use crate::error::{Result, UpdateError};
use crate::platform;

/// Everything the watchdog needs for one swap attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPlan {
    /// Host process to wait for. `0` means "do not wait".
    pub parent_pid: u32,
    pub target_exe: PathBuf,
    pub staging_path: PathBuf,
    #[serde(with = "duration_serde")]
    pub max_wait: Duration,
    pub log_path: PathBuf,
}

impl SwapPlan {
    /// Where the plan file for `target` is written.
    pub fn plan_file_for(target: &Path) -> PathBuf {
        platform::with_suffix(target, ".swap-plan.json")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|e| {
            UpdateError::Config(format!("cannot write swap plan {}: {e}", path.display()))
        })?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            UpdateError::Config(format!("cannot read swap plan {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Command-line arguments that make the watchdog read `plan_file`.
    pub fn watchdog_args(plan_file: &Path) -> Vec<OsString> {
        vec!["--plan".into(), plan_file.as_os_str().to_owned()]
    }
}
