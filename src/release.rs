//! Release-metadata client: "is there a newer release, and which file do I fetch?"

use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};

/// A published release as returned by the metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    /// Tag name (e.g. `"v1.1.0"`).
    pub tag_name: String,
    /// Attached assets, in the order the service lists them.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A single downloadable release asset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

/// Outcome of asset selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMatch<'a> {
    /// First asset whose name matches the pattern.
    Matched(&'a Asset),
    /// Nothing matched; the first listed asset is used instead.
    Fallback(&'a Asset),
    /// The release has no assets at all.
    Missing,
}

impl<'a> AssetMatch<'a> {
    pub fn asset(&self) -> Option<&'a Asset> {
        match self {
            AssetMatch::Matched(a) | AssetMatch::Fallback(a) => Some(a),
            AssetMatch::Missing => None,
        }
    }
}

/// Pick the asset to download from a release.
pub fn select_asset<'a>(release: &'a Release, pattern: &Regex) -> AssetMatch<'a> {
    if let Some(asset) = release.assets.iter().find(|a| pattern.is_match(&a.name)) {
        return AssetMatch::Matched(asset);
    }
    match release.assets.first() {
        Some(first) => AssetMatch::Fallback(first),
        None => AssetMatch::Missing,
    }
}

/// Tag and asset URL of the newest release. Both empty when nothing is published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestRelease {
    pub tag: String,
    pub asset_url: String,
}

impl LatestRelease {
    /// `true` when the service has no releases yet.
    pub fn is_empty(&self) -> bool {
        self.tag.is_empty()
    }

    pub fn has_asset(&self) -> bool {
        !self.asset_url.is_empty()
    }
}

/// Queries the release service for the latest release.
pub struct ReleaseChecker {
    client: reqwest::Client,
    endpoint: String,
    accept: String,
    timeout: std::time::Duration,
    pattern: Regex,
}

impl ReleaseChecker {
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        Self::with_client(config.http_client()?, config)
    }

    pub fn with_client(client: reqwest::Client, config: &UpdaterConfig) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: config.latest_release_url(),
            accept: config.accept.clone(),
            timeout: config.request_timeout,
            pattern: config.asset_regex()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the latest release and select its asset.
    ///
    /// A 404 means "no releases yet" and yields an empty [`LatestRelease`].
    pub async fn check_latest(&self, cancel: &CancellationToken) -> Result<LatestRelease> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpdateError::Cancelled),
            result = self.fetch_latest() => result,
        }
    }

    async fn fetch_latest(&self) -> Result<LatestRelease> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::ACCEPT, &self.accept)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                UpdateError::Network(format!(
                    "failed to fetch latest release from {}: {e}",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(endpoint = %self.endpoint, "no releases published");
            return Ok(LatestRelease::default());
        }
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let release: Release = response
            .json()
            .await
            .map_err(|e| UpdateError::Network(format!("failed to parse release JSON: {e}")))?;

        let selected = select_asset(&release, &self.pattern);
        match &selected {
            AssetMatch::Matched(a) => {
                tracing::debug!(tag = %release.tag_name, asset = %a.name, "asset matched")
            }
            AssetMatch::Fallback(a) => tracing::info!(
                tag = %release.tag_name,
                asset = %a.name,
                pattern = %self.pattern,
                "no asset matched, falling back to first asset"
            ),
            AssetMatch::Missing => {
                tracing::info!(tag = %release.tag_name, "release has no assets")
            }
        }

        Ok(LatestRelease {
            asset_url: selected
                .asset()
                .map(|a| a.browser_download_url.clone())
                .unwrap_or_default(),
            tag: release.tag_name,
        })
    }
}
