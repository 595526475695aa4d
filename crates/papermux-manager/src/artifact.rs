use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Context;
use futures_util::StreamExt;
use papermux_process::VersionChannel;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::error::SyncError;

/// Paper's download endpoint returns the jar directly; its real name (with
/// the build number) only appears in this header.
const DISPOSITION_PREFIX: &str = "attachment; filename*=UTF-8''";
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new build was written and older ones for the channel were pruned.
    Downloaded(Artifact),
    /// The remote's latest build is already on disk; nothing was touched.
    UpToDate(Artifact),
}

impl SyncOutcome {
    pub fn artifact(&self) -> &Artifact {
        match self {
            SyncOutcome::Downloaded(a) | SyncOutcome::UpToDate(a) => a,
        }
    }
}

/// Local jar files named `<prefix>-<channel>-<build>.<ext>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Same shape as the glob `<prefix>-<channel>-*.<ext>`.
    pub fn matches(&self, channel: &VersionChannel, file_name: &str) -> bool {
        let head = format!("{}-{}-", self.prefix, channel);
        let tail = format!(".{}", self.extension);
        file_name.len() >= head.len() + tail.len()
            && file_name.starts_with(&head)
            && file_name.ends_with(&tail)
    }

    /// Matching file names, newest first. Build numbers are assumed to sort
    /// correctly as strings.
    pub fn list(&self, channel: &VersionChannel) -> std::io::Result<Vec<String>> {
        let rd = match std::fs::read_dir(&self.dir) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        for entry in rd {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.matches(channel, &name) {
                out.push(name);
            }
        }
        out.sort_unstable_by(|a, b| b.cmp(a));
        Ok(out)
    }

    pub fn resolve_latest(&self, channel: &VersionChannel) -> std::io::Result<Option<Artifact>> {
        Ok(self
            .list(channel)?
            .into_iter()
            .next()
            .map(|name| self.artifact(name)))
    }

    fn artifact(&self, file_name: String) -> Artifact {
        Artifact {
            path: self.dir.join(&file_name),
            file_name,
        }
    }

    /// Deletes every artifact of the channel except `keep`.
    fn prune(&self, channel: &VersionChannel, keep: &str) -> Result<Vec<String>, SyncError> {
        let mut removed = Vec::new();
        let mut first_err: Option<std::io::Error> = None;
        for name in self.list(channel)? {
            if name == keep {
                continue;
            }
            match std::fs::remove_file(self.dir.join(&name)) {
                Ok(()) => {
                    tracing::info!(file = %name, "removed old version");
                    removed.push(name);
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "failed to remove old version");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(SyncError::Io(e)),
            None => Ok(removed),
        }
    }

    /// Removes `.part` files left by an interrupted earlier run.
    fn sweep_partials(&self, channel: &VersionChannel) {
        let Ok(rd) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in rd.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(PARTIAL_SUFFIX) else {
                continue;
            };
            if !self.matches(channel, stem) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => tracing::info!(file = %name, "removed stale partial download"),
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to remove stale partial download"),
            }
        }
    }
}

/// Extracts the file name from a `content-disposition` value.
pub fn filename_from_disposition(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let name = match raw.strip_prefix(DISPOSITION_PREFIX) {
        Some(rest) => rest.trim().to_string(),
        None => raw
            .split(';')
            .map(str::trim)
            .find_map(|p| p.strip_prefix("filename="))
            .map(|v| v.trim_matches('"').to_string())?,
    };
    if name.is_empty() { None } else { Some(name) }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().is_some_and(|n| n == name)
}

fn download_chunk_threshold(total_bytes: u64) -> u64 {
    if total_bytes >= 512 * 1024 * 1024 {
        64 * 1024 * 1024
    } else if total_bytes >= 64 * 1024 * 1024 {
        16 * 1024 * 1024
    } else {
        4 * 1024 * 1024
    }
}

/// Keeps one jar per channel in sync with the distribution endpoint.
pub struct Synchronizer {
    client: reqwest::Client,
    base_url: String,
    store: ArtifactStore,
}

impl Synchronizer {
    pub fn new(base_url: &str, store: ArtifactStore, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("papermux-manager/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::DownloadFailed {
                url: base_url.to_string(),
                source: e.into(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let store = ArtifactStore::new(
            &config.artifact_dir,
            &config.artifact_prefix,
            &config.artifact_extension,
        );
        Self::new(&config.download_base_url, store, config.download_timeout)
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn download_url(&self, channel: &VersionChannel) -> String {
        format!("{}/{}/latest/download", self.base_url, channel)
    }

    pub async fn sync_latest(&self, channel: &VersionChannel) -> Result<SyncOutcome, SyncError> {
        let url = self.download_url(channel);
        tracing::info!(%url, "checking for a newer server build");
        self.store.sweep_partials(channel);

        let failed = |e: anyhow::Error| SyncError::DownloadFailed {
            url: url.clone(),
            source: e.into(),
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("request latest build")
            .map_err(failed)?
            .error_for_status()
            .context("request latest build (status)")
            .map_err(failed)?;

        let file_name = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .ok_or_else(|| anyhow::anyhow!("response carries no content-disposition file name"))
            .map_err(failed)?;
        if !is_plain_file_name(&file_name) {
            return Err(failed(anyhow::anyhow!(
                "refusing unsafe artifact file name {file_name:?}"
            )));
        }
        // Pruning keys off this pattern; a name outside it would never be
        // launched and would cause every real build to be deleted.
        if !self.store.matches(channel, &file_name) {
            return Err(failed(anyhow::anyhow!(
                "artifact {file_name:?} does not belong to channel {channel}"
            )));
        }

        let path = self.store.dir.join(&file_name);
        if path.exists() {
            // Close the connection without reading the body.
            drop(resp);
            tracing::info!(file = %file_name, "no need to update, already have latest version");
            return Ok(SyncOutcome::UpToDate(self.store.artifact(file_name)));
        }

        tokio::fs::create_dir_all(&self.store.dir).await?;
        tracing::info!(file = %file_name, "downloading new server build");

        let tmp = self
            .store
            .dir
            .join(format!("{file_name}{PARTIAL_SUFFIX}"));
        if let Err(e) = write_body(resp, &tmp, &path).await {
            return Err(match tokio::fs::remove_file(&tmp).await {
                Ok(()) => failed(e),
                Err(rm) if rm.kind() == std::io::ErrorKind::NotFound => failed(e),
                Err(rm) => {
                    tracing::error!(path = %tmp.display(), error = %rm, "could not remove partial download");
                    SyncError::PartialWriteLeftover {
                        path: tmp,
                        source: rm,
                    }
                }
            });
        }

        self.store.prune(channel, &file_name)?;
        Ok(SyncOutcome::Downloaded(self.store.artifact(file_name)))
    }
}

/// Streams the body to `tmp` chunk by chunk, then renames it over `dest`.
async fn write_body(resp: reqwest::Response, tmp: &Path, dest: &Path) -> anyhow::Result<()> {
    let total_bytes = resp.content_length().unwrap_or(0);
    let threshold = download_chunk_threshold(total_bytes);

    let mut f = tokio::fs::File::create(tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;
    let started_at = Instant::now();
    let mut downloaded_bytes = 0u64;
    let mut last_emit_bytes = 0u64;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read response body chunk")?;
        f.write_all(&chunk)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        downloaded_bytes = downloaded_bytes.saturating_add(chunk.len() as u64);
        if downloaded_bytes.saturating_sub(last_emit_bytes) >= threshold {
            tracing::debug!(downloaded_bytes, total_bytes, "download progress");
            last_emit_bytes = downloaded_bytes;
        }
    }
    if total_bytes > 0 && downloaded_bytes != total_bytes {
        anyhow::bail!("body ended after {downloaded_bytes} of {total_bytes} bytes");
    }

    f.flush().await?;
    f.sync_all().await?;
    drop(f);
    tokio::fs::rename(tmp, dest)
        .await
        .with_context(|| format!("move download into {}", dest.display()))?;

    let elapsed = started_at.elapsed().as_secs_f64();
    let speed = if elapsed > 0.0 {
        (downloaded_bytes as f64 / elapsed).round() as u64
    } else {
        0
    };
    tracing::info!(
        downloaded_bytes,
        speed_bytes_per_sec = speed,
        "download complete"
    );
    Ok(())
}
