//! Stream a release asset into a staging file beside the target executable.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, UpdateError};
use crate::platform;

/// Download progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes written so far. Never decreases within one download.
    pub downloaded: u64,
    /// Content length reported by the server, if any.
    pub total: Option<u64>,
}

impl Progress {
    /// Total as a signed value, `-1` when the server did not report a length.
    pub fn total_or_unknown(&self) -> i64 {
        self.total
            .and_then(|t| i64::try_from(t).ok())
            .unwrap_or(-1)
    }
}

/// Downloads artifacts into `<target><staging suffix>`.
///
/// Bytes land in a temporary file in the target's directory first so the
/// final rename never crosses a filesystem boundary. The temporary file is
/// removed on every failure path, including cancellation and drop.
pub struct Downloader {
    client: reqwest::Client,
    staging: PathBuf,
}

impl Downloader {
    pub fn new(client: reqwest::Client, staging: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging: staging.into(),
        }
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Fetch `url` into the staging path and return it.
    pub async fn download_to_staging<F>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(Progress) + Send,
    {
        if url.is_empty() {
            return Err(UpdateError::InvalidInput("empty asset url".into()));
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            r = self.client.get(url).send() => r,
        };
        let response =
            sent.map_err(|e| UpdateError::Download(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Download(format!(
                "server returned status {} for {url}",
                status.as_u16()
            )));
        }

        let total = response.content_length();
        let dir = platform::parent_dir(&self.staging);
        let partial = tempfile::Builder::new()
            .prefix(".partial-download-")
            .tempfile_in(&dir)?;
        let mut file = tokio::fs::File::from_std(partial.as_file().try_clone()?);

        tracing::info!(url, total = ?total, staging = %self.staging.display(), "downloading update");

        let mut downloaded: u64 = 0;
        on_progress(Progress { downloaded, total });

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(downloaded, "download cancelled");
                    return Err(UpdateError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = next else { break };
            let chunk =
                chunk.map_err(|e| UpdateError::Download(format!("reading body from {url}: {e}")))?;

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(Progress { downloaded, total });
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = total {
            if expected != downloaded {
                return Err(UpdateError::Download(format!(
                    "truncated body: got {downloaded} of {expected} bytes"
                )));
            }
        }

        platform::set_executable(partial.path())?;
        partial
            .persist(&self.staging)
            .map_err(|e| UpdateError::Io(e.error))?;

        tracing::info!(bytes = downloaded, path = %self.staging.display(), "update staged");
        Ok(self.staging.clone())
    }
}
