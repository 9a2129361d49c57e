use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ModelSpec, TrainingJobId, TrainingObjective};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A `checkpoint-<step>` directory written during training.
    Checkpoint,
    /// The final model directory (weights, processor, config).
    FinalModel,
    JobSpec,
    DatasetJsonl,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// File hash, or a hash over `relative path + file hash` pairs for directories.
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainingMetrics {
    pub train_loss: Option<f64>,
    pub eval_loss: Option<f64>,
    pub steps: Option<u64>,
    pub learning_rate: Option<f64>,
    pub epoch: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub objective: TrainingObjective,
    pub base_model: ModelSpec,
    pub dataset_id: DatasetId,
    pub num_examples: usize,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
    /// Commit URL when the model was pushed to the Hub.
    #[serde(default)]
    pub hub_commit: Option<String>,
}

impl TrainingManifest {
    /// Highest-step checkpoint recorded for the run.
    pub fn latest_checkpoint(&self) -> Option<&TrainingArtifact> {
        self.artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Checkpoint)
            .max_by_key(|a| a.step.unwrap_or(0))
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Regular files under `root`, sorted, skipping directories rejected by `keep_dir`.
pub fn collect_files(root: &Path, keep_dir: impl Fn(&Path) -> bool) -> TrainingResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || keep_dir(e.path()));
    for entry in walker {
        let entry = entry.map_err(|e| TrainingError::Artifact(format!("failed to walk {}: {}", root.display(), e)))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Hash over `relative path + file hash` pairs.
pub fn sha256_files(root: &Path, files: &[PathBuf]) -> TrainingResult<String> {
    let mut hasher = Sha256::new();
    for file in files {
        let rel = file.strip_prefix(root).unwrap_or(file);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(sha256_file(file)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_dir(path: &Path) -> TrainingResult<String> {
    let files = collect_files(path, |_| true)?;
    sha256_files(path, &files)
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<TrainingArtifact> {
    let sha256 = if path.is_dir() {
        sha256_dir(&path)?
    } else if path.is_file() {
        sha256_file(&path)?
    } else {
        return Err(TrainingError::Artifact(format!("artifact path does not exist: {}", path.display())));
    };
    Ok(TrainingArtifact { kind, path, sha256, step: None })
}
