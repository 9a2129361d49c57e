//! Image archive download (Kaggle) and staging next to the metadata file.

use crate::error::{DataError, DataResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const KAGGLE_ENDPOINT: &str = "https://www.kaggle.com";

/// Kaggle API credentials.
#[derive(Clone, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl std::fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleCredentials").field("username", &self.username).field("key", &"<redacted>").finish()
    }
}

impl KaggleCredentials {
    /// `KAGGLE_USERNAME` / `KAGGLE_KEY`, falling back to `~/.kaggle/kaggle.json`.
    pub fn discover() -> DataResult<Self> {
        if let (Ok(username), Ok(key)) = (std::env::var("KAGGLE_USERNAME"), std::env::var("KAGGLE_KEY")) {
            return Ok(Self { username, key });
        }

        let path = std::env::var("KAGGLE_CONFIG_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".kaggle")))
            .map(|d| d.join("kaggle.json"))
            .ok_or_else(|| DataError::Credentials("cannot locate home directory for kaggle.json".to_string()))?;

        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> DataResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            DataError::Credentials(format!(
                "set KAGGLE_USERNAME and KAGGLE_KEY or create {} ({e})",
                path.display()
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

const EXTRACT_MARKER: &str = ".extracted";

/// Outcome of staging images into the output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub staged: usize,
    pub failed: usize,
}

/// Minimal Kaggle dataset download client.
#[derive(Debug, Clone)]
pub struct KaggleClient {
    endpoint: String,
    credentials: KaggleCredentials,
    cache_dir: PathBuf,
    client: Client,
}

impl KaggleClient {
    pub fn new(credentials: KaggleCredentials) -> DataResult<Self> {
        let cache_dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("polycap").join("kaggle");
        let client = Client::builder().connect_timeout(Duration::from_secs(30)).build()?;
        Ok(Self { endpoint: KAGGLE_ENDPOINT.to_string(), credentials, cache_dir, client })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Download and extract `<owner>/<slug>`, returning the extraction directory.
    ///
    /// A previous extraction is reused unless `force` is set. An extraction only counts
    /// once its marker file is written; otherwise the cached `archive.zip` is unpacked
    /// again, and downloaded first if it is missing too.
    pub async fn download_dataset(&self, handle: &str, force: bool) -> DataResult<PathBuf> {
        let (owner, slug) = handle
            .split_once('/')
            .filter(|(o, s)| !o.is_empty() && !s.is_empty() && !s.contains('/'))
            .ok_or_else(|| DataError::InvalidSource(format!("expected <owner>/<dataset>, got {handle}")))?;

        let dataset_dir = self.cache_dir.join(owner).join(slug);
        let extract_dir = dataset_dir.join("files");
        let archive_path = dataset_dir.join("archive.zip");
        if !force {
            if extract_dir.join(EXTRACT_MARKER).is_file() {
                tracing::info!("Using cached Kaggle dataset at {}", extract_dir.display());
                return Ok(extract_dir);
            }
            if archive_path.is_file() {
                tracing::info!("Re-extracting cached archive {}", archive_path.display());
                extract_archive(archive_path, extract_dir.clone()).await?;
                return Ok(extract_dir);
            }
        }

        tokio::fs::create_dir_all(&dataset_dir).await?;
        let url = format!("{}/api/v1/datasets/download/{owner}/{slug}", self.endpoint);
        tracing::info!("Downloading {} from Kaggle", handle);

        let mut response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.key))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Download(format!("GET {url} returned {status}: {body}")));
        }

        // Written under a temporary name so an interrupted download never looks complete.
        let partial_path = dataset_dir.join("archive.zip.part");
        let mut file = tokio::fs::File::create(&partial_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial_path, &archive_path).await?;
        tracing::debug!("Wrote {} bytes to {}", written, archive_path.display());

        extract_archive(archive_path, extract_dir.clone()).await?;
        Ok(extract_dir)
    }
}

/// Unpack `archive_path` into a clean `extract_dir` and mark it complete.
async fn extract_archive(archive_path: PathBuf, extract_dir: PathBuf) -> DataResult<()> {
    tokio::task::spawn_blocking(move || -> DataResult<()> {
        if extract_dir.exists() {
            std::fs::remove_dir_all(&extract_dir)?;
        }
        extract_zip(&archive_path, &extract_dir)?;
        std::fs::write(extract_dir.join(EXTRACT_MARKER), b"")?;
        Ok(())
    })
    .await
    .map_err(|e| DataError::Download(format!("extraction task failed: {e}")))?
}

pub fn extract_zip(archive_path: &Path, dest: &Path) -> DataResult<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;
    archive.extract(dest)?;
    Ok(())
}

/// Place every regular file directly under `source_dir` into `dest_dir`.
///
/// Files are hard-linked when possible and copied otherwise, so the source (usually
/// the download cache) stays intact for the next run. Failures are logged per file and
/// counted; they do not abort staging.
pub fn stage_images(source_dir: &Path, dest_dir: &Path) -> DataResult<StageReport> {
    if !source_dir.is_dir() {
        return Err(DataError::InvalidSource(format!("image folder not found: {}", source_dir.display())));
    }
    std::fs::create_dir_all(dest_dir)?;

    let mut report = StageReport::default();
    for entry in std::fs::read_dir(source_dir)? {
        let entry = entry?;
        let source = entry.path();
        if !source.is_file() {
            continue;
        }
        let destination = dest_dir.join(entry.file_name());
        match link_or_copy(&source, &destination) {
            Ok(()) => report.staged += 1,
            Err(e) => {
                tracing::error!("Error staging file {}: {}", entry.file_name().to_string_lossy(), e);
                report.failed += 1;
            }
        }
    }

    tracing::info!("Successfully staged {} images", report.staged);
    Ok(report)
}

fn link_or_copy(source: &Path, destination: &Path) -> std::io::Result<()> {
    if destination.exists() {
        std::fs::remove_file(destination)?;
    }
    // Hard links fail across filesystems; the cache usually lives on another mount.
    if std::fs::hard_link(source, destination).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, destination).map(|_| ())
}
