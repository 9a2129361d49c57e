use crate::sampling::RebalanceOptions;
use crate::sources::SourceLocation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_AFRIMMD: &str = "hf://datasets/AfriMM/AfriMMD/data/train-00000-of-00001.parquet";
pub const DEFAULT_AVILA: &str = "hf://datasets/sartifyllc/AViLaData/all-final-v1-african-languages-captions.csv";
pub const DEFAULT_DATASET_REPO: &str = "heisguyy/pt-paligemma-multilingual-imagecaptions";

/// `[prepare]` section of `polycap.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Directory receiving `metadata.csv` and the images.
    pub output_dir: PathBuf,
    pub afrimmd: SourceLocation,
    pub avila: SourceLocation,
    pub sample_size: usize,
    pub exempt_languages: Vec<String>,
    /// Fixed seed for prompt selection and sampling; random when unset.
    pub seed: Option<u64>,
    pub images: ImageConfig,
    pub publish: PublishConfig,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        let rebalance = RebalanceOptions::default();
        Self {
            output_dir: PathBuf::from("data"),
            afrimmd: SourceLocation::Hub {
                repo_id: "AfriMM/AfriMMD".to_string(),
                revision: None,
                path: "data/train-00000-of-00001.parquet".to_string(),
            },
            avila: SourceLocation::Hub {
                repo_id: "sartifyllc/AViLaData".to_string(),
                revision: None,
                path: "all-final-v1-african-languages-captions.csv".to_string(),
            },
            sample_size: rebalance.sample_size,
            exempt_languages: rebalance.exempt_languages,
            seed: None,
            images: ImageConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl PrepareConfig {
    pub fn rebalance_options(&self) -> RebalanceOptions {
        RebalanceOptions { sample_size: self.sample_size, exempt_languages: self.exempt_languages.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    /// Kaggle dataset handle (`<owner>/<slug>`).
    pub kaggle_dataset: String,
    /// Folder inside the archive that holds the images.
    pub subdir: String,
    pub force_download: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kaggle_dataset: "adityajn105/flickr30k".to_string(),
            subdir: "Images".to_string(),
            force_download: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    pub repo_id: String,
    pub private: bool,
    pub revision: String,
    /// Hub endpoint override (mirrors, tests).
    pub endpoint: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_id: DEFAULT_DATASET_REPO.to_string(),
            private: false,
            revision: "main".to_string(),
            endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_published_sources() {
        let config = PrepareConfig::default();
        assert_eq!(config.afrimmd.to_string(), DEFAULT_AFRIMMD);
        assert_eq!(config.avila.to_string(), DEFAULT_AVILA);
        assert_eq!(config.sample_size, 150_000);
        assert_eq!(config.exempt_languages, vec!["ha", "af"]);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: PrepareConfig = from_json(
            r#"{"output_dir": "out", "avila": "local/avila.csv", "images": {"enabled": false}}"#,
        );
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.avila, SourceLocation::Local(PathBuf::from("local/avila.csv")));
        assert!(!config.images.enabled);
        assert_eq!(config.images.subdir, "Images");
        assert_eq!(config.publish.repo_id, DEFAULT_DATASET_REPO);
    }

    fn from_json(json: &str) -> PrepareConfig {
        serde_json::from_str(json).unwrap()
    }
}
