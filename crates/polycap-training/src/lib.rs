//! Polycap Training
//!
//! Backend-agnostic primitives for fine-tuning a captioning model:
//! - Defining training jobs (`TrainingJobSpec`, `TrainingArguments`)
//! - Turning prepared metadata into prefix/caption examples and image batches
//! - Writing training artifacts + manifests
//! - Implementing training backends (`Trainer`), including the process launcher

pub mod artifacts;
pub mod builders;
pub mod collate;
pub mod dataset;
pub mod error;
pub mod job;
pub mod launcher;
pub mod layout;
pub mod progress;
pub mod registry;
pub mod trainer;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use builders::{build_dataset, read_jsonl_dataset, write_jsonl_dataset, DatasetBuildOptions};
pub use collate::{CaptionBatch, CaptionCollator};
pub use dataset::{CaptionExample, Dataset, DatasetId, DatasetSource};
pub use error::{TrainingError, TrainingResult};
pub use job::{
    FreezePolicy, HubTarget, ModelDtype, ModelSpec, Optimizer, PromptTemplate, ResumeFrom, SaveStrategy,
    TrainingArguments, TrainingDevice, TrainingJobId, TrainingJobSpec, TrainingObjective, TrainingResources,
};
pub use launcher::{LaunchPaths, LaunchedTrainer, LauncherConfig, LAUNCHER_SCRIPT};
pub use layout::TrainingLayout;
pub use progress::{CollectingProgressSink, ProgressEvent, ProgressSink, StdoutProgressSink, TracingProgressSink};
pub use registry::{discover_training_runs, list_checkpoints, resolve_resume_checkpoint, TrainingRunEntry};
pub use trainer::{Trainer, TrainerStatus};
