use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// One captioning example: the model sees `image` and `prefix` and learns to emit `suffix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionExample {
    pub prefix: String,
    pub suffix: String,
    pub image: PathBuf,
    pub language: String,
}

pub type Dataset = Vec<CaptionExample>;

/// Where the dataset comes from (builder responsibility).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSource {
    /// A prepared `metadata.csv` with its images stored under `image_dir`.
    Metadata {
        csv: PathBuf,
        image_dir: PathBuf,
    },
    /// An existing JSONL dataset (each line is a `CaptionExample`).
    Jsonl {
        path: PathBuf,
    },
}

pub fn compute_dataset_id(examples: &[CaptionExample]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for ex in examples {
        let bytes = serde_json::to_vec(ex)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

pub fn validate_examples(examples: &[CaptionExample]) -> TrainingResult<()> {
    if examples.is_empty() {
        return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
    }
    for (idx, ex) in examples.iter().enumerate() {
        if ex.prefix.trim().is_empty() {
            return Err(TrainingError::Dataset(format!("example[{idx}] prefix is empty")));
        }
        if ex.suffix.trim().is_empty() {
            return Err(TrainingError::Dataset(format!("example[{idx}] caption is empty")));
        }
        if ex.image.as_os_str().is_empty() {
            return Err(TrainingError::Dataset(format!("example[{idx}] has no image")));
        }
    }
    Ok(())
}
