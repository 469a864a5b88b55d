use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::platform;

/// File name of the standalone swap watchdog binary (without exe suffix).
pub const WATCHDOG_BIN: &str = "a3s-swap-watchdog";

/// Settings for release checks, staging and the swap watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Repository owner on the release service (e.g. `"A3S-Lab"`).
    #[serde(default)]
    pub owner: String,

    /// Repository name; also drives the default asset pattern.
    #[serde(default)]
    pub repo: String,

    /// Base URL of the release-metadata API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// `Accept` header sent with metadata requests.
    #[serde(default = "default_accept")]
    pub accept: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for a metadata request (and connect timeout for downloads).
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Executable to replace. Defaults to the running executable.
    #[serde(default)]
    pub target_exe: Option<PathBuf>,

    /// Suffix appended to the target path for the staged download.
    #[serde(default = "default_staging_suffix")]
    pub staging_suffix: String,

    /// Explicit asset regex. Derived from `repo` and the platform when absent.
    #[serde(default)]
    pub asset_pattern: Option<String>,

    /// Watchdog binary. Defaults to `a3s-swap-watchdog` beside the target.
    #[serde(default)]
    pub watchdog_exe: Option<PathBuf>,

    /// Watchdog log file. Defaults to `launcher.log` beside the target.
    #[serde(default)]
    pub watchdog_log: Option<PathBuf>,

    /// How long the watchdog may wait for the host to exit and the swap to land.
    #[serde(default = "default_max_wait", with = "duration_serde")]
    pub max_wait: Duration,

    #[serde(default = "default_poll_initial_delay", with = "duration_serde")]
    pub poll_initial_delay: Duration,

    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}
fn default_accept() -> String {
    "application/vnd.github+json".into()
}
fn default_user_agent() -> String {
    format!("a3s-selfupdate/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}
fn default_staging_suffix() -> String {
    ".pending".into()
}
fn default_max_wait() -> Duration {
    Duration::from_secs(60)
}
fn default_poll_initial_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            api_base: default_api_base(),
            accept: default_accept(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            target_exe: None,
            staging_suffix: default_staging_suffix(),
            asset_pattern: None,
            watchdog_exe: None,
            watchdog_log: None,
            max_wait: default_max_wait(),
            poll_initial_delay: default_poll_initial_delay(),
            poll_interval: default_poll_interval(),
            log_level: default_log_level(),
        }
    }
}

pub mod duration_serde {
    //! Durations written as `"500ms"`, `"20s"`, `"5m"` or `"6h"`.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn format_duration(d: Duration) -> String {
        if d.subsec_millis() != 0 || d.as_secs() == 0 {
            format!("{}ms", d.as_millis())
        } else {
            format!("{}s", d.as_secs())
        }
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (value, scale) = if let Some(v) = s.strip_suffix("ms") {
            (v, 0)
        } else if let Some(v) = s.strip_suffix('s') {
            (v, 1)
        } else if let Some(v) = s.strip_suffix('m') {
            (v, 60)
        } else if let Some(v) = s.strip_suffix('h') {
            (v, 3600)
        } else {
            return Err(format!(
                "unknown duration format: '{s}' (use '500ms', '20s', '5m' or '6h')"
            ));
        };
        let n = value.trim().parse::<u64>().map_err(|e| e.to_string())?;
        Ok(if scale == 0 {
            Duration::from_millis(n)
        } else {
            Duration::from_secs(n * scale)
        })
    }
}

impl UpdaterConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Self::default()
        }
    }

    /// Read a TOML config file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| UpdateError::Config(format!("cannot read {}: {e}", path.display())))?;
        let cfg: UpdaterConfig = toml::from_str(&src)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.asset_regex()?;
        if self.staging_suffix.is_empty() {
            return Err(UpdateError::Config("staging_suffix must not be empty".into()));
        }
        for (name, value) in [
            ("request_timeout", self.request_timeout),
            ("max_wait", self.max_wait),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(UpdateError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Whether enough is configured to query the release service.
    pub fn is_configured(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty()
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_target_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_exe = Some(path.into());
        self
    }

    pub fn with_asset_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.asset_pattern = Some(pattern.into());
        self
    }

    pub fn with_watchdog_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.watchdog_exe = Some(path.into());
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_delays(mut self, initial: Duration, interval: Duration) -> Self {
        self.poll_initial_delay = initial;
        self.poll_interval = interval;
        self
    }

    /// Compiled asset-selection pattern.
    pub fn asset_regex(&self) -> Result<Regex> {
        let pattern = match &self.asset_pattern {
            Some(p) => p.clone(),
            None => platform::default_asset_pattern(&self.repo, platform::exe_suffix()),
        };
        Regex::new(&pattern)
            .map_err(|e| UpdateError::Config(format!("invalid asset_pattern '{pattern}': {e}")))
    }

    /// `GET` endpoint for the latest release.
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    /// The executable being updated.
    pub fn resolve_target_exe(&self) -> Result<PathBuf> {
        match &self.target_exe {
            Some(p) => Ok(p.clone()),
            None => std::env::current_exe().map_err(|e| {
                UpdateError::Config(format!("cannot determine current executable path: {e}"))
            }),
        }
    }

    pub fn staging_path(&self, target: &Path) -> PathBuf {
        platform::with_suffix(target, &self.staging_suffix)
    }

    pub fn watchdog_path(&self, target: &Path) -> PathBuf {
        self.watchdog_exe.clone().unwrap_or_else(|| {
            platform::parent_dir(target).join(format!("{WATCHDOG_BIN}{}", platform::exe_suffix()))
        })
    }

    pub fn watchdog_log_path(&self, target: &Path) -> PathBuf {
        self.watchdog_log
            .clone()
            .unwrap_or_else(|| platform::parent_dir(target).join("launcher.log"))
    }

    /// Shared HTTP client. Per-request timeouts are applied by callers so
    /// long downloads are not cut off.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.request_timeout)
            .build()
            .map_err(|e| UpdateError::Config(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::duration_serde::{format_duration, parse_duration};
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = UpdaterConfig::default();
        assert_eq!(cfg.api_base, "https://api.github.com");
        assert_eq!(cfg.staging_suffix, ".pending");
        assert_eq!(cfg.request_timeout, Duration::from_secs(20));
        assert_eq!(cfg.max_wait, Duration::from_secs(60));
        assert_eq!(cfg.poll_initial_delay, Duration::from_secs(30));
        assert_eq!(cfg.poll_interval, Duration::from_secs(6 * 3600));
        assert!(!cfg.is_configured());
    }

    #[test]
    fn test_parse_toml() {
        let cfg: UpdaterConfig = toml::from_str(
            r#"
            owner = "nineteenss"
            repo = "goods_app"
            max_wait = "90s"
            poll_interval = "1h"
            poll_initial_delay = "500ms"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.owner, "nineteenss");
        assert_eq!(cfg.max_wait, Duration::from_secs(90));
        assert_eq!(cfg.poll_interval, Duration::from_secs(3600));
        assert_eq!(cfg.poll_initial_delay, Duration::from_millis(500));
        assert_eq!(cfg.accept, "application/vnd.github+json");
        assert!(cfg.is_configured());
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("fast").is_err());
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(60)), "60s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let cfg = UpdaterConfig::new("o", "r").with_asset_pattern("([unclosed");
        assert!(matches!(cfg.validate(), Err(UpdateError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let cfg = UpdaterConfig::new("o", "r").with_max_wait(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_latest_release_url() {
        let cfg = UpdaterConfig::new("nineteenss", "goods_app").with_api_base("http://127.0.0.1:9/");
        assert_eq!(
            cfg.latest_release_url(),
            "http://127.0.0.1:9/repos/nineteenss/goods_app/releases/latest"
        );
    }

    #[test]
    fn test_sibling_paths() {
        let cfg = UpdaterConfig::new("o", "r");
        let target = Path::new("/opt/goods/goods_app");
        assert_eq!(cfg.staging_path(target), PathBuf::from("/opt/goods/goods_app.pending"));
        assert_eq!(cfg.watchdog_log_path(target), PathBuf::from("/opt/goods/launcher.log"));
        assert_eq!(
            cfg.watchdog_path(target),
            PathBuf::from(format!("/opt/goods/{WATCHDOG_BIN}{}", platform::exe_suffix()))
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = UpdaterConfig::load(&dir.path().join("update.toml")).unwrap();
        assert_eq!(cfg.staging_suffix, ".pending");
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.toml");
        std::fs::write(&path, "max_wait = \"forever\"").unwrap();
        assert!(UpdaterConfig::from_file(&path).is_err());
    }
}
