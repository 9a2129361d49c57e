//! Training command implementation.

use crate::commands::types::{TrainCommand, TrainRunArgs};
use crate::config::PolycapConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use polycap_training::{
    discover_training_runs, DatasetSource, LaunchedTrainer, ProgressEvent, ProgressSink, ResumeFrom, Trainer,
    TracingProgressSink, TrainingJobSpec, TrainingManifest, TrainingObjective,
};
use serde_json::json;
use std::path::Path;

pub async fn execute(workspace: &Path, command: TrainCommand) -> Result<()> {
    match command {
        TrainCommand::Run(args) => run(workspace, args).await,
        TrainCommand::List { json: json_output } => list_runs(workspace, json_output),
    }
}

/// Progress bar over optimizer steps; other events are printed above it.
struct BarProgressSink {
    bar: ProgressBar,
}

impl BarProgressSink {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl ProgressSink for BarProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => self.bar.println(format!("Training job {}", job_id.0.cyan())),
            ProgressEvent::Message { message, .. } => self.bar.println(format!("  {}", message.dimmed())),
            ProgressEvent::Step { step, total, .. } => {
                if let Some(total) = total {
                    self.bar.set_length(total);
                }
                self.bar.set_position(step);
            }
            ProgressEvent::Metrics { metrics, .. } => {
                if let Some(loss) = metrics.train_loss {
                    self.bar.set_message(format!("loss {loss:.4}"));
                }
            }
            ProgressEvent::Finished { .. } => self.bar.finish_and_clear(),
        }
    }
}

fn build_job(config: &PolycapConfig, args: &TrainRunArgs, workspace: &Path) -> Result<TrainingJobSpec> {
    let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { workspace.join(p) };
    let csv = args.metadata.as_deref().map_or_else(|| config.metadata_path(), resolve);
    let image_dir = args.image_dir.as_deref().map_or_else(|| config.image_dir(), resolve);

    let train = &config.train;
    let mut job =
        TrainingJobSpec::new(train.model.clone(), TrainingObjective::Sft, DatasetSource::Metadata { csv, image_dir });
    job.args = train.args.clone();
    if let Some(dir) = &args.output_dir {
        job.args.output_dir = resolve(dir.as_path());
    }
    job.freeze = train.freeze.clone();
    job.prompt = train.prompt.clone();
    job.resources = train.resources.clone();
    if train.push_to_hub && !args.no_push {
        job.hub = Some(train.hub.clone());
    }
    if let Some(resume) = &args.resume {
        job.resume = Some(match resume.parse::<ResumeFrom>()? {
            ResumeFrom::Path(p) => ResumeFrom::Path(resolve(p.as_path())),
            latest => latest,
        });
    }

    job.validate()?;
    Ok(job)
}

async fn run(workspace: &Path, args: TrainRunArgs) -> Result<()> {
    let mut config = PolycapConfig::load(workspace, args.config.as_deref())?;
    config.resolve_paths(workspace);
    let job = build_job(&config, &args, workspace)?;

    let trainer = LaunchedTrainer::new(workspace.to_path_buf(), config.train.launcher.clone());
    trainer.prepare(&job).await?;

    let bar_sink;
    let tracing_sink = TracingProgressSink;
    let sink: &dyn ProgressSink = if args.json {
        &tracing_sink
    } else {
        bar_sink = BarProgressSink::new();
        &bar_sink
    };

    let training = trainer.run(&job, sink);
    tokio::pin!(training);
    let manifest = tokio::select! {
        result = &mut training => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; stopping the launcher");
            trainer.cancel(&job.job_id).await?;
            training.await
        }
    }
    .context("Training failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    print_manifest(&manifest);
    Ok(())
}

fn print_manifest(manifest: &TrainingManifest) {
    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Job:       {}", manifest.job_id.0.cyan());
    println!("  Examples:  {}", manifest.num_examples);
    if let Some(steps) = manifest.metrics.steps {
        println!("  Steps:     {}", steps);
    }
    if let Some(loss) = manifest.metrics.train_loss {
        println!("  Loss:      {:.4}", loss);
    }
    println!("  Output:    {}", manifest.output_dir.display());
    if let Some(ckpt) = manifest.latest_checkpoint() {
        println!("  Checkpoint: {}", ckpt.path.display().to_string().dimmed());
    }
    if let Some(url) = &manifest.hub_commit {
        println!("  Pushed:    {}", url.cyan());
    }
    println!();
}

fn list_runs(workspace: &Path, json_output: bool) -> Result<()> {
    let runs = discover_training_runs(workspace).context("Failed to discover training runs")?;

    if json_output {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                json!({
                    "job_id": r.job_id,
                    "created_at": r.created_at(),
                    "complete": r.is_complete(),
                    "base_model": r.spec.as_ref().map(|s| s.base_model.model_id.clone()),
                    "output_dir": r.manifest.as_ref().map(|m| m.output_dir.clone()),
                    "train_loss": r.manifest.as_ref().and_then(|m| m.metrics.train_loss),
                    "hub_commit": r.manifest.as_ref().and_then(|m| m.hub_commit.clone()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Training Runs ({})", runs.len()).bold().cyan());
    println!();

    if runs.is_empty() {
        println!("  {}", "No training runs found for this workspace.".dimmed());
        println!();
        println!("  {}", "Tip: run `polycap train run` after `polycap prepare`.".dimmed());
        return Ok(());
    }

    println!("{:<38} {:<10} {}", "Job", "Status", "Output");
    println!("{}", "─".repeat(90));
    for run in runs {
        let status = if run.is_complete() { "complete".green() } else { "incomplete".yellow() };
        let output = run
            .manifest
            .as_ref()
            .map(|m| m.output_dir.display().to_string())
            .or_else(|| run.spec.as_ref().map(|s| s.args.output_dir.display().to_string()))
            .unwrap_or_default();
        println!("{:<38} {:<10} {}", run.job_id.cyan(), status, output.dimmed());
    }
    println!();
    Ok(())
}
