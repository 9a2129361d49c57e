use crate::error::TrainingResult;
use crate::job::TrainingJobId;
use std::path::{Path, PathBuf};

/// Filesystem layout for run bookkeeping inside a workspace.
///
/// Default layout is `.polycap/runs/<job_id>/...`. Model weights live in the job's
/// `output_dir`, not here.
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn for_workspace_root(workspace_root: &Path) -> Self {
        Self::new(workspace_root.join(".polycap").join("runs"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn job_dir(&self, job_id: &TrainingJobId) -> PathBuf {
        self.root.join(job_id.0.as_str())
    }

    #[must_use]
    pub fn job_spec_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("job.json")
    }

    #[must_use]
    pub fn job_manifest_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("training_manifest.json")
    }

    #[must_use]
    pub fn dataset_jsonl_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("examples.jsonl")
    }

    #[must_use]
    pub fn log_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("launcher.log")
    }

    /// Copy of the bundled launcher script for this run.
    #[must_use]
    pub fn launcher_script_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("train.py")
    }

    pub fn ensure_job_dirs(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.job_dir(job_id))?;
        Ok(())
    }
}
