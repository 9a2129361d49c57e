use crate::artifacts::TrainingManifest;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ResumeFrom, TrainingJobSpec};
use crate::layout::TrainingLayout;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// A run found under the workspace's run directory.
///
/// Runs that failed or were cancelled have a job spec but no manifest.
#[derive(Debug, Clone)]
pub struct TrainingRunEntry {
    pub job_id: String,
    pub job_dir: PathBuf,
    pub spec: Option<TrainingJobSpec>,
    pub manifest: Option<TrainingManifest>,
}

impl TrainingRunEntry {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.spec.as_ref().map(|s| s.created_at)
    }

    pub fn is_complete(&self) -> bool {
        self.manifest.is_some()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> TrainingResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Like `read_json`, but a file that cannot be read or parsed is logged and treated as absent.
fn read_run_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    read_json(path).unwrap_or_else(|e| {
        tracing::warn!("Skipping unreadable {}: {}", path.display(), e);
        None
    })
}

/// Discover runs by scanning `.polycap/runs/*/{job.json,training_manifest.json}`, oldest first.
pub fn discover_training_runs(workspace_root: &Path) -> TrainingResult<Vec<TrainingRunEntry>> {
    let layout = TrainingLayout::for_workspace_root(workspace_root);
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(layout.root()) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let job_dir = entry.path();
        if !job_dir.is_dir() {
            continue;
        }
        let spec: Option<TrainingJobSpec> = read_run_file(&job_dir.join("job.json"));
        let manifest: Option<TrainingManifest> = read_run_file(&job_dir.join("training_manifest.json"));
        if spec.is_none() && manifest.is_none() {
            continue;
        }

        let job_id = entry.file_name().to_string_lossy().into_owned();
        out.push(TrainingRunEntry { job_id, job_dir, spec, manifest });
    }

    out.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.job_id.cmp(&b.job_id)));
    Ok(out)
}

/// Step number of a `checkpoint-<step>` directory name.
pub fn checkpoint_step(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.strip_prefix(CHECKPOINT_PREFIX)?.parse().ok()
}

/// `checkpoint-<step>` directories in `output_dir`, sorted by step.
pub fn list_checkpoints(output_dir: &Path) -> TrainingResult<Vec<(u64, PathBuf)>> {
    let dir = match std::fs::read_dir(output_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut checkpoints = Vec::new();
    for entry in dir {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(step) = checkpoint_step(&path) {
            checkpoints.push((step, path));
        }
    }
    checkpoints.sort_by_key(|(step, _)| *step);
    Ok(checkpoints)
}

pub fn resolve_resume_checkpoint(resume: &ResumeFrom, output_dir: &Path) -> TrainingResult<PathBuf> {
    match resume {
        ResumeFrom::Latest => list_checkpoints(output_dir)?
            .pop()
            .map(|(_, path)| path)
            .ok_or_else(|| {
                TrainingError::InvalidSpec(format!("no checkpoint-<step> directory found in {}", output_dir.display()))
            }),
        ResumeFrom::Path(path) if path.is_dir() => Ok(path.clone()),
        ResumeFrom::Path(path) => {
            Err(TrainingError::InvalidSpec(format!("resume checkpoint does not exist: {}", path.display())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetSource;
    use crate::job::{ModelSpec, TrainingJobId, TrainingObjective};
    use tempfile::TempDir;

    #[test]
    fn test_latest_checkpoint_orders_numerically() {
        let temp = TempDir::new().unwrap();
        for name in ["checkpoint-900", "checkpoint-1000", "checkpoint-x", "runs"] {
            std::fs::create_dir_all(temp.path().join(name)).unwrap();
        }
        std::fs::write(temp.path().join("checkpoint-5000"), b"file, not dir").unwrap();

        let steps: Vec<u64> = list_checkpoints(temp.path()).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![900, 1000]);

        let latest = resolve_resume_checkpoint(&ResumeFrom::Latest, temp.path()).unwrap();
        assert_eq!(latest, temp.path().join("checkpoint-1000"));
    }

    #[test]
    fn test_resume_errors_without_checkpoint() {
        let temp = TempDir::new().unwrap();
        assert!(resolve_resume_checkpoint(&ResumeFrom::Latest, temp.path()).is_err());
        assert!(resolve_resume_checkpoint(&ResumeFrom::Path(temp.path().join("checkpoint-1")), temp.path()).is_err());
        assert!(list_checkpoints(&temp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_discover_training_runs_reads_job_specs() {
        let temp = TempDir::new().unwrap();
        assert!(discover_training_runs(temp.path()).unwrap().is_empty());

        let layout = TrainingLayout::for_workspace_root(temp.path());
        let mut spec = TrainingJobSpec::new(
            ModelSpec::default(),
            TrainingObjective::Sft,
            DatasetSource::Jsonl { path: PathBuf::from("examples.jsonl") },
        );
        spec.job_id = TrainingJobId("run-a".to_string());
        layout.ensure_job_dirs(&spec.job_id).unwrap();
        std::fs::write(layout.job_spec_path(&spec.job_id), serde_json::to_vec(&spec).unwrap()).unwrap();
        std::fs::create_dir_all(layout.root().join("empty")).unwrap();

        let runs = discover_training_runs(temp.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].job_id, "run-a");
        assert!(!runs[0].is_complete());
    }

    #[test]
    fn test_discover_skips_half_written_runs() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::for_workspace_root(temp.path());
        let mut spec = TrainingJobSpec::new(
            ModelSpec::default(),
            TrainingObjective::Sft,
            DatasetSource::Jsonl { path: PathBuf::from("examples.jsonl") },
        );
        spec.job_id = TrainingJobId("good".to_string());
        layout.ensure_job_dirs(&spec.job_id).unwrap();
        std::fs::write(layout.job_spec_path(&spec.job_id), serde_json::to_vec(&spec).unwrap()).unwrap();
        std::fs::write(layout.job_manifest_path(&spec.job_id), b"{\"job_id\": ").unwrap();

        let broken = TrainingJobId("broken".to_string());
        layout.ensure_job_dirs(&broken).unwrap();
        std::fs::write(layout.job_spec_path(&broken), b"{\"job_id\": \"bro").unwrap();

        let runs = discover_training_runs(temp.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].job_id, "good");
        assert!(runs[0].spec.is_some());
        assert!(!runs[0].is_complete());
    }
}
