//! A `Trainer` that hands the optimization loop to an external process.
//!
//! The run directory receives `job.json` (the resolved `TrainingJobSpec`) and
//! `examples.jsonl`; the configured program is then spawned with `{job}`,
//! `{examples}` and `{output_dir}` substituted into its arguments. Each stdout line
//! that parses as a JSON object with `step`, `loss`, `learning_rate` or `epoch` is a
//! metrics update; anything else is forwarded as a message. Stderr goes to
//! `launcher.log` in the run directory.
//!
//! The default launcher is the bundled `train.py`, copied into the run directory as
//! `{script}` before every launch.

use crate::artifacts::{
    collect_files, make_artifact, sha256_files, ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics,
};
use crate::builders::{build_dataset, write_jsonl_dataset, DatasetBuildOptions};
use crate::collate::CaptionCollator;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{HubTarget, ResumeFrom, TrainingJobId, TrainingJobSpec};
use crate::layout::TrainingLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::{checkpoint_step, list_checkpoints, resolve_resume_checkpoint};
use crate::trainer::{Trainer, TrainerStatus};
use async_trait::async_trait;
use polycap_data::{HubClient, HubRepoType, UploadFile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;

pub const JOB_FILE_ENV: &str = "POLYCAP_JOB_FILE";
pub const EXAMPLES_FILE_ENV: &str = "POLYCAP_EXAMPLES_FILE";
pub const OUTPUT_DIR_ENV: &str = "POLYCAP_OUTPUT_DIR";

/// Bundled PaliGemma fine-tuning script, the default launcher.
pub const LAUNCHER_SCRIPT: &str = include_str!("../launcher/train.py");

/// Stderr lines kept for the error message of a failed launch.
const STDERR_TAIL: usize = 20;

/// How to start the external training process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Batches decoded before launch to catch unreadable images early; 0 disables.
    pub preflight_batches: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["{script}".to_string(), "--job".to_string(), "{job}".to_string()],
            env: BTreeMap::new(),
            working_dir: None,
            preflight_batches: 2,
        }
    }
}

/// Files a launch refers to; each fills the placeholder of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPaths {
    pub script: PathBuf,
    pub job: PathBuf,
    pub examples: PathBuf,
    pub output_dir: PathBuf,
}

impl LauncherConfig {
    pub fn render_args(&self, paths: &LaunchPaths) -> Vec<String> {
        let script = paths.script.to_string_lossy();
        let job = paths.job.to_string_lossy();
        let examples = paths.examples.to_string_lossy();
        let output_dir = paths.output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{script}", &script)
                    .replace("{job}", &job)
                    .replace("{examples}", &examples)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct LauncherLine {
    step: Option<u64>,
    loss: Option<f64>,
    eval_loss: Option<f64>,
    learning_rate: Option<f64>,
    epoch: Option<f64>,
}

impl LauncherLine {
    fn parse(line: &str) -> Option<Self> {
        let parsed: Self = serde_json::from_str(line).ok()?;
        let has_metrics = parsed.step.is_some()
            || parsed.loss.is_some()
            || parsed.eval_loss.is_some()
            || parsed.learning_rate.is_some()
            || parsed.epoch.is_some();
        has_metrics.then_some(parsed)
    }

    fn apply(&self, metrics: &mut TrainingMetrics) {
        if let Some(step) = self.step {
            metrics.steps = Some(step);
        }
        if let Some(loss) = self.loss {
            metrics.train_loss = Some(loss);
        }
        if let Some(loss) = self.eval_loss {
            metrics.eval_loss = Some(loss);
        }
        if let Some(lr) = self.learning_rate {
            metrics.learning_rate = Some(lr);
        }
        if let Some(epoch) = self.epoch {
            metrics.epoch = Some(epoch);
        }
    }
}

enum Outcome {
    Exited,
    Cancelled,
    TimedOut(u64),
}

#[derive(Clone)]
pub struct LaunchedTrainer {
    workspace_root: PathBuf,
    launcher: LauncherConfig,
    hub: Option<HubClient>,
    statuses: Arc<Mutex<HashMap<String, TrainerStatus>>>,
    cancels: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl LaunchedTrainer {
    #[must_use]
    pub fn new(workspace_root: PathBuf, launcher: LauncherConfig) -> Self {
        Self {
            workspace_root,
            launcher,
            hub: None,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Use this client for the final push instead of one built from the environment.
    #[must_use]
    pub fn with_hub_client(mut self, hub: HubClient) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn layout(&self) -> TrainingLayout {
        TrainingLayout::for_workspace_root(&self.workspace_root)
    }

    fn set_status(&self, job_id: &TrainingJobId, status: TrainerStatus) {
        if let Ok(mut s) = self.statuses.lock() {
            s.insert(job_id.0.clone(), status);
        }
    }

    /// Fresh cancel handle for a job that is starting.
    fn register_cancel_handle(&self, job_id: &TrainingJobId) -> Arc<Notify> {
        let handle = Arc::new(Notify::new());
        if let Ok(mut c) = self.cancels.lock() {
            c.insert(job_id.0.clone(), handle.clone());
        }
        handle
    }

    /// Handle of a running job; `None` once it has finished or if it never started.
    fn running_cancel_handle(&self, job_id: &TrainingJobId) -> Option<Arc<Notify>> {
        self.cancels.lock().ok().and_then(|c| c.get(&job_id.0).cloned())
    }

    fn release_cancel_handle(&self, job_id: &TrainingJobId) {
        if let Ok(mut c) = self.cancels.lock() {
            c.remove(&job_id.0);
        }
    }

    /// Output directory relative to the workspace unless absolute.
    fn output_dir(&self, job: &TrainingJobSpec) -> PathBuf {
        if job.args.output_dir.is_absolute() {
            job.args.output_dir.clone()
        } else {
            self.workspace_root.join(&job.args.output_dir)
        }
    }

    async fn run_job(
        &self,
        job: &TrainingJobSpec,
        cancel: &Notify,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainingManifest> {
        let job_id = job.job_id.clone();
        let layout = self.layout();
        layout.ensure_job_dirs(&job_id)?;
        let output_dir = self.output_dir(job);
        std::fs::create_dir_all(&output_dir)?;

        progress.on_event(ProgressEvent::Message { job_id: job_id.clone(), message: "building dataset".to_string() });
        let options = DatasetBuildOptions { prompt: job.prompt.clone(), ..DatasetBuildOptions::default() };
        let (dataset, dataset_id) = build_dataset(&job.dataset, &options)?;
        tracing::info!("Dataset {} has {} examples", dataset_id.0, dataset.len());

        if self.launcher.preflight_batches > 0 {
            let batch_size = job.args.per_device_train_batch_size as usize;
            let take = (batch_size * self.launcher.preflight_batches).min(dataset.len());
            let sample = dataset[..take].to_vec();
            let collator = CaptionCollator::new(job.base_model.image_size);
            let checked = tokio::task::spawn_blocking(move || collator.preflight(&sample, batch_size, usize::MAX))
                .await
                .map_err(|e| TrainingError::Trainer(format!("preflight task failed: {e}")))??;
            tracing::debug!("Preflight decoded {} images", checked);
        }

        let examples_path = layout.dataset_jsonl_path(&job_id);
        write_jsonl_dataset(&examples_path, &dataset)?;

        let mut resolved = job.clone();
        if let Some(resume) = &job.resume {
            let checkpoint = resolve_resume_checkpoint(resume, &output_dir)?;
            tracing::info!("Resuming from {}", checkpoint.display());
            resolved.resume = Some(ResumeFrom::Path(checkpoint));
        }
        resolved.args.output_dir = output_dir.clone();
        let job_path = layout.job_spec_path(&job_id);
        std::fs::write(&job_path, serde_json::to_vec_pretty(&resolved)?)?;
        let script_path = layout.launcher_script_path(&job_id);
        std::fs::write(&script_path, LAUNCHER_SCRIPT)?;

        let paths = LaunchPaths {
            script: script_path,
            job: job_path.clone(),
            examples: examples_path.clone(),
            output_dir: output_dir.clone(),
        };
        let total = Some(job.planned_steps(dataset.len()));
        let metrics = self.launch(job, &paths, total, cancel, progress).await?;

        let mut artifacts = vec![
            make_artifact(ArtifactKind::JobSpec, job_path)?,
            make_artifact(ArtifactKind::DatasetJsonl, examples_path)?,
        ];
        let log_path = layout.log_path(&job_id);
        if log_path.is_file() {
            artifacts.push(make_artifact(ArtifactKind::Log, log_path)?);
        }
        for (step, path) in list_checkpoints(&output_dir)? {
            let mut artifact = make_artifact(ArtifactKind::Checkpoint, path)?;
            artifact.step = Some(step);
            artifacts.push(artifact);
        }

        let model_files = collect_files(&output_dir, |dir| checkpoint_step(dir).is_none())?;
        if !model_files.is_empty() {
            artifacts.push(TrainingArtifact {
                kind: ArtifactKind::FinalModel,
                path: output_dir.clone(),
                sha256: sha256_files(&output_dir, &model_files)?,
                step: None,
            });
        }

        let hub_commit = match &job.hub {
            Some(target) if !model_files.is_empty() => {
                self.set_status(&job_id, TrainerStatus::Publishing);
                progress.on_event(ProgressEvent::Message {
                    job_id: job_id.clone(),
                    message: "pushing model to the hub".to_string(),
                });
                Some(self.push_to_hub(target, &output_dir, &model_files).await?)
            }
            Some(_) => {
                tracing::warn!("{} holds no model files; skipping hub push", output_dir.display());
                None
            }
            None => None,
        };

        let manifest = TrainingManifest {
            job_id: job_id.clone(),
            created_at: chrono::Utc::now(),
            objective: job.objective.clone(),
            base_model: job.base_model.clone(),
            dataset_id,
            num_examples: dataset.len(),
            output_dir,
            metrics,
            artifacts,
            hub_commit,
        };
        std::fs::write(layout.job_manifest_path(&job_id), serde_json::to_vec_pretty(&manifest)?)?;
        Ok(manifest)
    }

    async fn launch(
        &self,
        job: &TrainingJobSpec,
        paths: &LaunchPaths,
        total: Option<u64>,
        cancel: &Notify,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainingMetrics> {
        let job_id = &job.job_id;
        let args = self.launcher.render_args(paths);
        tracing::info!("Launching {} {}", self.launcher.program, args.join(" "));

        let mut command = Command::new(&self.launcher.program);
        command
            .args(&args)
            .envs(&self.launcher.env)
            .env(JOB_FILE_ENV, &paths.job)
            .env(EXAMPLES_FILE_ENV, &paths.examples)
            .env(OUTPUT_DIR_ENV, &paths.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.launcher.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TrainingError::Trainer(format!("failed to start `{}`: {}", self.launcher.program, e)))?;
        self.set_status(job_id, TrainerStatus::Running);

        let stdout = child.stdout.take().ok_or_else(|| TrainingError::Trainer("launcher stdout unavailable".to_string()))?;
        let stderr = child.stderr.take().ok_or_else(|| TrainingError::Trainer("launcher stderr unavailable".to_string()))?;

        let log_path = self.layout().log_path(job_id);
        let stderr_task = tokio::spawn(async move {
            let mut log = tokio::fs::File::create(&log_path).await.ok();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "polycap::launcher", "{line}");
                if let Some(file) = log.as_mut() {
                    let _ = file.write_all(format!("{line}\n").as_bytes()).await;
                }
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>()
        });

        let max_seconds = job.resources.max_seconds;
        let deadline = async move {
            match max_seconds {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut metrics = TrainingMetrics::default();
        let mut lines = BufReader::new(stdout).lines();
        let outcome = loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => handle_line(job_id, &line, total, &mut metrics, progress),
                    None => break Outcome::Exited,
                },
                () = cancel.notified() => break Outcome::Cancelled,
                () = &mut deadline => break Outcome::TimedOut(max_seconds.unwrap_or_default()),
            }
        };

        match outcome {
            Outcome::Exited => {}
            Outcome::Cancelled => {
                child.kill().await?;
                return Err(TrainingError::Cancelled(job_id.0.clone()));
            }
            Outcome::TimedOut(secs) => {
                child.kill().await?;
                return Err(TrainingError::Trainer(format!("launcher exceeded the {secs}s time limit")));
            }
        }

        let status = child.wait().await?;
        let tail = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let detail = if tail.is_empty() { String::new() } else { format!(":\n{}", tail.join("\n")) };
            return Err(TrainingError::Trainer(format!("launcher exited with {status}{detail}")));
        }
        Ok(metrics)
    }

    async fn push_to_hub(&self, target: &HubTarget, output_dir: &Path, files: &[PathBuf]) -> TrainingResult<String> {
        let mut hub = match &self.hub {
            Some(hub) => hub.clone(),
            None => HubClient::from_env()?,
        };
        if let Some(endpoint) = &target.endpoint {
            hub = hub.with_endpoint(endpoint.clone());
        }

        let repo_id = match &target.repo_id {
            Some(repo_id) => repo_id.clone(),
            None => {
                let owner = hub.whoami().await?;
                let name = output_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| TrainingError::InvalidSpec("output_dir has no final component".to_string()))?;
                format!("{owner}/{name}")
            }
        };

        let uploads: Vec<UploadFile> = files
            .iter()
            .map(|path| {
                let rel = path.strip_prefix(output_dir).unwrap_or(path);
                let path_in_repo = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
                UploadFile { local_path: path.clone(), path_in_repo }
            })
            .collect();

        hub.create_repo(&repo_id, HubRepoType::Model, target.private).await?;
        let commit = hub.upload_files(&repo_id, HubRepoType::Model, "main", &uploads, "End of training").await?;
        Ok(commit.commit_url)
    }
}

fn handle_line(
    job_id: &TrainingJobId,
    line: &str,
    total: Option<u64>,
    metrics: &mut TrainingMetrics,
    progress: &dyn ProgressSink,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match LauncherLine::parse(line) {
        Some(update) => {
            update.apply(metrics);
            if let Some(step) = update.step {
                progress.on_event(ProgressEvent::Step { job_id: job_id.clone(), step, total });
            }
            progress.on_event(ProgressEvent::Metrics { job_id: job_id.clone(), metrics: metrics.clone() });
        }
        None => progress.on_event(ProgressEvent::Message { job_id: job_id.clone(), message: line.to_string() }),
    }
}

#[async_trait]
impl Trainer for LaunchedTrainer {
    fn id(&self) -> &'static str {
        "launcher"
    }

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()> {
        job.validate()?;
        self.layout().ensure_job_dirs(&job.job_id)?;
        Ok(())
    }

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest> {
        job.validate()?;
        let job_id = job.job_id.clone();
        progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });
        self.set_status(&job_id, TrainerStatus::Preparing);

        let cancel = self.register_cancel_handle(&job_id);
        let result = self.run_job(job, &cancel, progress).await;
        self.release_cancel_handle(&job_id);

        match &result {
            Ok(_) => {
                self.set_status(&job_id, TrainerStatus::Finished);
                progress.on_event(ProgressEvent::Finished { job_id });
            }
            Err(TrainingError::Cancelled(_)) => self.set_status(&job_id, TrainerStatus::Cancelled),
            Err(e) => self.set_status(&job_id, TrainerStatus::Failed(e.to_string())),
        }
        result
    }

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus> {
        Ok(self
            .statuses
            .lock()
            .ok()
            .and_then(|s| s.get(&job_id.0).cloned())
            .unwrap_or(TrainerStatus::Idle))
    }

    async fn cancel(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        match self.running_cancel_handle(job_id) {
            Some(handle) => handle.notify_one(),
            None => tracing::debug!("Job {} is not running; nothing to cancel", job_id),
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dataset::{CaptionExample, DatasetSource};
    use crate::job::{ModelSpec, TrainingObjective};
    use crate::progress::CollectingProgressSink;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn sh(script: &str) -> LauncherConfig {
        LauncherConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            preflight_batches: 1,
            ..LauncherConfig::default()
        }
    }

    fn job(root: &Path) -> TrainingJobSpec {
        let image = root.join("1.png");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([0, 128, 255]));
        img.save(&image).unwrap();

        let examples: Vec<CaptionExample> = ["en", "sw", "zu"]
            .iter()
            .map(|lang| CaptionExample {
                prefix: format!("caption {lang}"),
                suffix: format!("caption in {lang}"),
                image: image.clone(),
                language: (*lang).to_string(),
            })
            .collect();
        let path = root.join("input.jsonl");
        write_jsonl_dataset(&path, &examples).unwrap();

        let mut spec = TrainingJobSpec::new(ModelSpec::default(), TrainingObjective::Sft, DatasetSource::Jsonl { path });
        spec.base_model.image_size = 8;
        spec.args.output_dir = PathBuf::from("out");
        spec
    }

    fn paths() -> LaunchPaths {
        LaunchPaths {
            script: PathBuf::from("/r/train.py"),
            job: PathBuf::from("/r/job.json"),
            examples: PathBuf::from("/r/ex.jsonl"),
            output_dir: PathBuf::from("/o"),
        }
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let config = LauncherConfig {
            args: vec!["--job={job}".to_string(), "{examples}".to_string(), "{output_dir}/final".to_string()],
            ..LauncherConfig::default()
        };
        assert_eq!(config.render_args(&paths()), vec!["--job=/r/job.json", "/r/ex.jsonl", "/o/final"]);
    }

    #[test]
    fn test_default_launcher_runs_bundled_script() {
        let config = LauncherConfig::default();
        assert_eq!(config.program, "python3");
        assert_eq!(config.render_args(&paths()), vec!["/r/train.py", "--job", "/r/job.json"]);

        // Flags and env vars the script reads must match what the launcher provides.
        for flag in ["\"--job\"", "\"--examples\"", JOB_FILE_ENV, EXAMPLES_FILE_ENV, "examples.jsonl"] {
            assert!(LAUNCHER_SCRIPT.contains(flag), "script does not reference {flag}");
        }
    }

    #[test]
    fn test_bundled_script_reads_job_fields() {
        let spec = TrainingJobSpec::new(
            ModelSpec::default(),
            TrainingObjective::Sft,
            DatasetSource::Jsonl { path: PathBuf::from("x.jsonl") },
        );
        let job = serde_json::to_value(&spec).unwrap();
        let args = job["args"].as_object().unwrap();
        for key in args.keys() {
            let indexed = format!("train_args[\"{key}\"]");
            let optional = format!("train_args.get(\"{key}\")");
            assert!(
                LAUNCHER_SCRIPT.contains(&indexed) || LAUNCHER_SCRIPT.contains(&optional),
                "script ignores args.{key}"
            );
        }
        for key in ["base_model", "model_id", "dtype", "frozen_modules", "resume", "max_steps", "device"] {
            assert!(LAUNCHER_SCRIPT.contains(&format!("\"{key}\"")), "script ignores {key}");
        }
        assert_eq!(job["base_model"]["dtype"], "bf16");
        assert_eq!(job["args"]["optim"], "adamw_hf");

        let example = serde_json::to_value(CaptionExample {
            prefix: "caption en".to_string(),
            suffix: "a dog".to_string(),
            image: PathBuf::from("1.jpg"),
            language: "en".to_string(),
        })
        .unwrap();
        for key in example.as_object().unwrap().keys().filter(|k| *k != "language") {
            assert!(LAUNCHER_SCRIPT.contains(&format!("example[\"{key}\"]")), "script ignores example.{key}");
        }
        for key in ["\"step\"", "\"loss\"", "\"learning_rate\"", "\"epoch\""] {
            assert!(LAUNCHER_SCRIPT.contains(key));
        }
    }

    #[test]
    fn test_launcher_line_parsing() {
        assert!(LauncherLine::parse("loading checkpoint shards").is_none());
        assert!(LauncherLine::parse("{\"note\": 1}").is_none());

        let line = LauncherLine::parse(r#"{"step": 100, "loss": 1.5, "learning_rate": 2e-5, "epoch": 0.5}"#).unwrap();
        let mut metrics = TrainingMetrics::default();
        line.apply(&mut metrics);
        assert_eq!(metrics.steps, Some(100));
        assert_eq!(metrics.train_loss, Some(1.5));
        assert_eq!(metrics.epoch, Some(0.5));
    }

    #[tokio::test]
    async fn test_run_records_metrics_and_checkpoints() {
        let temp = TempDir::new().unwrap();
        let spec = job(temp.path());
        let script = r#"test -f "$POLYCAP_JOB_FILE" || exit 3
echo "loading model"
echo '{"step": 1, "loss": 2.5, "learning_rate": 1e-5, "epoch": 0.5}'
mkdir -p {output_dir}/checkpoint-1 {output_dir}/checkpoint-2
echo state > {output_dir}/checkpoint-2/trainer_state.json
echo weights > {output_dir}/model.safetensors
echo '{"step": 2, "loss": 1.25, "epoch": 1.0}'
echo "done" >&2"#;
        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh(script));
        let sink = CollectingProgressSink::default();

        trainer.prepare(&spec).await.unwrap();
        let manifest = trainer.run(&spec, &sink).await.unwrap();

        assert_eq!(manifest.num_examples, 3);
        assert_eq!(manifest.metrics.steps, Some(2));
        assert_eq!(manifest.metrics.train_loss, Some(1.25));
        assert_eq!(manifest.metrics.learning_rate, Some(1e-5));
        assert_eq!(manifest.latest_checkpoint().and_then(|a| a.step), Some(2));
        assert!(manifest.artifacts.iter().any(|a| a.kind == ArtifactKind::FinalModel));
        assert!(manifest.hub_commit.is_none());
        assert_eq!(trainer.status(&spec.job_id).await.unwrap(), TrainerStatus::Finished);

        let layout = trainer.layout();
        assert!(layout.job_manifest_path(&spec.job_id).is_file());
        assert_eq!(std::fs::read_to_string(layout.launcher_script_path(&spec.job_id)).unwrap(), LAUNCHER_SCRIPT);
        let log = std::fs::read_to_string(layout.log_path(&spec.job_id)).unwrap();
        assert!(log.contains("done"));

        let events = sink.events();
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Message { message, .. } if message == "loading model")));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Step { step: 2, total: Some(_), .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn test_run_reports_launcher_failure() {
        let temp = TempDir::new().unwrap();
        let spec = job(temp.path());
        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh("echo 'CUDA out of memory' >&2; exit 7"));

        let err = trainer.run(&spec, &CollectingProgressSink::default()).await.unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
        assert!(matches!(trainer.status(&spec.job_id).await.unwrap(), TrainerStatus::Failed(_)));
        assert!(!trainer.layout().job_manifest_path(&spec.job_id).exists());
    }

    #[tokio::test]
    async fn test_cancel_kills_launcher() {
        let temp = TempDir::new().unwrap();
        let spec = job(temp.path());
        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh("echo started; sleep 30"));

        let runner = trainer.clone();
        let run_spec = spec.clone();
        let handle = tokio::spawn(async move { runner.run(&run_spec, &CollectingProgressSink::default()).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        trainer.cancel(&spec.job_id).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(TrainingError::Cancelled(_))));
        assert_eq!(trainer.status(&spec.job_id).await.unwrap(), TrainerStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_of_idle_job_leaves_no_handle() {
        let temp = TempDir::new().unwrap();
        let spec = job(temp.path());
        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh("true"));

        trainer.cancel(&TrainingJobId("never-started".to_string())).await.unwrap();
        assert!(trainer.cancels.lock().unwrap().is_empty());

        trainer.run(&spec, &CollectingProgressSink::default()).await.unwrap();
        trainer.cancel(&spec.job_id).await.unwrap();
        assert!(trainer.cancels.lock().unwrap().is_empty());
        assert_eq!(trainer.status(&spec.job_id).await.unwrap(), TrainerStatus::Finished);
    }

    #[tokio::test]
    async fn test_time_limit_stops_launcher() {
        let temp = TempDir::new().unwrap();
        let mut spec = job(temp.path());
        spec.resources.max_seconds = Some(1);
        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh("sleep 30"));

        let err = trainer.run(&spec, &CollectingProgressSink::default()).await.unwrap_err();
        assert!(err.to_string().contains("time limit"));
    }

    #[tokio::test]
    async fn test_resume_latest_is_resolved_in_job_file() {
        let temp = TempDir::new().unwrap();
        let mut spec = job(temp.path());
        spec.resume = Some(ResumeFrom::Latest);
        std::fs::create_dir_all(temp.path().join("out/checkpoint-1000")).unwrap();

        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh("true"));
        trainer.run(&spec, &CollectingProgressSink::default()).await.unwrap();

        let written: TrainingJobSpec =
            serde_json::from_slice(&std::fs::read(trainer.layout().job_spec_path(&spec.job_id)).unwrap()).unwrap();
        assert_eq!(written.resume, Some(ResumeFrom::Path(temp.path().join("out/checkpoint-1000"))));
        assert_eq!(written.args.output_dir, temp.path().join("out"));
    }

    #[tokio::test]
    async fn test_push_to_hub_uploads_model_files() {
        let mut server = mockito::Server::new_async().await;
        let whoami = server
            .mock("GET", "/api/whoami-v2")
            .with_status(200)
            .with_body(r#"{"name": "me"}"#)
            .create_async()
            .await;
        let create = server.mock("POST", "/api/repos/create").with_status(200).with_body("{}").create_async().await;
        let preupload = server
            .mock("POST", "/api/models/me/out/preupload/main")
            .with_status(200)
            .with_body(r#"{"files": [{"path": "model.safetensors", "uploadMode": "regular"}]}"#)
            .create_async()
            .await;
        let commit = server
            .mock("POST", "/api/models/me/out/commit/main")
            .match_body(mockito::Matcher::Regex("End of training".to_string()))
            .with_status(200)
            .with_body(r#"{"commitUrl": "https://hub.test/me/out/commit/abc"}"#)
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let mut spec = job(temp.path());
        spec.hub = Some(HubTarget { repo_id: None, private: false, endpoint: None });
        let script = "mkdir -p {output_dir}/checkpoint-5 && echo w > {output_dir}/model.safetensors";
        let hub = HubClient::new("token").unwrap().with_endpoint(server.url());
        let trainer = LaunchedTrainer::new(temp.path().to_path_buf(), sh(script)).with_hub_client(hub);

        let manifest = trainer.run(&spec, &CollectingProgressSink::default()).await.unwrap();
        assert_eq!(manifest.hub_commit.as_deref(), Some("https://hub.test/me/out/commit/abc"));

        whoami.assert_async().await;
        create.assert_async().await;
        preupload.assert_async().await;
        commit.assert_async().await;
    }
}
