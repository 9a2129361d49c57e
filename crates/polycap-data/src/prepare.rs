//! End-to-end dataset preparation.

use crate::config::PrepareConfig;
use crate::error::DataResult;
use crate::hub::{resolve_token, HubClient};
use crate::images::{stage_images, KaggleClient, KaggleCredentials, StageReport};
use crate::languages::LanguageCatalog;
use crate::metadata::{missing_images, write_metadata, METADATA_FILE_NAME};
use crate::pipeline::{prepare_records, PrepareReport};
use crate::publish::{publish_dataset, PublishTarget};
use crate::sampling::rebalance;
use crate::sources::{load_afrimmd, load_avila, SourceFetcher};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareSummary {
    pub report: PrepareReport,
    pub rows_written: usize,
    pub metadata_path: PathBuf,
    pub images: Option<StageReport>,
    pub commit_url: Option<String>,
}

/// Run every preparation step configured in `config`.
pub async fn run_prepare(config: &PrepareConfig) -> DataResult<PrepareSummary> {
    tracing::info!("Starting data preparation process");
    std::fs::create_dir_all(&config.output_dir)?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    tracing::info!("Loading caption data from sources");
    let fetcher = SourceFetcher::new(resolve_token())?;
    let afrimmd_path = fetcher.fetch(&config.afrimmd).await?;
    let avila_path = fetcher.fetch(&config.avila).await?;

    tracing::info!("Restructuring AfriMMD data");
    let afrimmd = load_afrimmd(&afrimmd_path)?;
    tracing::info!("Processing AViLa data");
    let avila = load_avila(&avila_path)?;

    tracing::info!("Concatenating datasets");
    let (rows, report) = prepare_records(afrimmd, avila, &LanguageCatalog, &mut rng)?;

    tracing::info!("Cut data length");
    let rows = rebalance(rows, &config.rebalance_options(), &mut rng)?;

    let metadata_path = config.output_dir.join(METADATA_FILE_NAME);
    tracing::info!("Saving processed data to {}", metadata_path.display());
    write_metadata(&metadata_path, &rows)?;

    let images = if config.images.enabled {
        tracing::info!("Downloading {} dataset", config.images.kaggle_dataset);
        let kaggle = KaggleClient::new(KaggleCredentials::discover()?)?;
        let extracted = kaggle.download_dataset(&config.images.kaggle_dataset, config.images.force_download).await?;
        tracing::info!("Staging images in the destination folder");
        let report = stage_images(&extracted.join(&config.images.subdir), &config.output_dir)?;
        let missing = missing_images(&rows, &config.output_dir);
        if !missing.is_empty() {
            tracing::warn!("{} metadata rows reference images that were not staged", missing.len());
        }
        Some(report)
    } else {
        tracing::info!("Skipping image download");
        None
    };
    tracing::info!("Data preparation completed");

    let commit_url = if config.publish.enabled {
        let mut hub = HubClient::from_env()?;
        if let Some(endpoint) = &config.publish.endpoint {
            hub = hub.with_endpoint(endpoint.clone());
        }
        let target = PublishTarget {
            repo_id: config.publish.repo_id.clone(),
            private: config.publish.private,
            revision: config.publish.revision.clone(),
        };
        let staging = publish_staging_dir(&config.output_dir)?;
        let result = publish_dataset(&hub, &target, &rows, &staging).await;
        remove_staging_dir(&staging);
        let info = result?;
        tracing::info!("Data pushed to {}", info.commit_url);
        Some(info.commit_url)
    } else {
        None
    };

    Ok(PrepareSummary { report, rows_written: rows.len(), metadata_path, images, commit_url })
}

fn publish_staging_dir(output_dir: &std::path::Path) -> DataResult<PathBuf> {
    let dir = output_dir.join(".publish");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Remove the publish staging directory; failures are logged. Returns whether it is gone.
fn remove_staging_dir(dir: &std::path::Path) -> bool {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove publish staging directory {}: {}", dir.display(), e);
            false
        }
    }
}
