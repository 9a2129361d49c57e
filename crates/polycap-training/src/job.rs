use crate::dataset::DatasetSource;
use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelDtype {
    Bf16,
    F16,
    F32,
}

/// The pretrained checkpoint to fine-tune.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    /// Hub model id (e.g. "google/paligemma-3b-mix-224").
    pub model_id: String,
    pub dtype: ModelDtype,
    /// Square input resolution of the vision tower.
    pub image_size: u32,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self { model_id: "google/paligemma-3b-mix-224".to_string(), dtype: ModelDtype::Bf16, image_size: 224 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingObjective {
    /// Prefix -> caption supervised fine-tuning.
    Sft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingResources {
    pub device: TrainingDevice,
    /// Overrides the step count derived from epochs.
    pub max_steps: Option<u64>,
    /// Wall-clock limit for the whole run.
    pub max_seconds: Option<u64>,
}

impl Default for TrainingResources {
    fn default() -> Self {
        Self { device: TrainingDevice::Cuda, max_steps: None, max_seconds: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingDevice {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    AdamwHf,
    AdamwTorch,
    Adafactor,
    Sgd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    No,
    Steps,
    Epoch,
}

/// Arguments handed to the external trainer. Defaults reproduce the reference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArguments {
    pub seed: u64,
    pub num_train_epochs: u32,
    pub per_device_train_batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub warmup_steps: u32,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub adam_beta2: f64,
    pub logging_steps: u32,
    pub optim: Optimizer,
    pub save_strategy: SaveStrategy,
    pub save_steps: u32,
    pub save_total_limit: Option<u32>,
    pub output_dir: PathBuf,
    pub bf16: bool,
    pub dataloader_pin_memory: bool,
    pub gradient_checkpointing: bool,
    pub remove_unused_columns: bool,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            seed: 42,
            num_train_epochs: 2,
            per_device_train_batch_size: 4,
            gradient_accumulation_steps: 4,
            warmup_steps: 2,
            learning_rate: 2e-5,
            weight_decay: 1e-6,
            adam_beta2: 0.999,
            logging_steps: 100,
            optim: Optimizer::AdamwHf,
            save_strategy: SaveStrategy::Steps,
            save_steps: 1000,
            save_total_limit: Some(1),
            output_dir: PathBuf::from("kagglex-paligemma"),
            bf16: true,
            dataloader_pin_memory: false,
            gradient_checkpointing: true,
            remove_unused_columns: false,
        }
    }
}

impl TrainingArguments {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.num_train_epochs == 0 {
            return Err(TrainingError::InvalidSpec("num_train_epochs must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainingError::InvalidSpec("weight_decay must be >= 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.adam_beta2) {
            return Err(TrainingError::InvalidSpec("adam_beta2 must be in [0, 1)".to_string()));
        }
        if self.per_device_train_batch_size == 0 {
            return Err(TrainingError::InvalidSpec("per_device_train_batch_size must be >= 1".to_string()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainingError::InvalidSpec("gradient_accumulation_steps must be >= 1".to_string()));
        }
        if self.logging_steps == 0 {
            return Err(TrainingError::InvalidSpec("logging_steps must be >= 1".to_string()));
        }
        if self.save_strategy == SaveStrategy::Steps && self.save_steps == 0 {
            return Err(TrainingError::InvalidSpec("save_steps must be >= 1 with the steps save strategy".to_string()));
        }
        if self.save_total_limit == Some(0) {
            return Err(TrainingError::InvalidSpec("save_total_limit must be >= 1 when set".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("output_dir is required".to_string()));
        }
        Ok(())
    }

    /// Examples consumed by one optimizer update on a single device.
    pub fn effective_batch_size(&self) -> u64 {
        u64::from(self.per_device_train_batch_size) * u64::from(self.gradient_accumulation_steps)
    }

    /// Optimizer updates for `num_examples`, matching the usual dataloader arithmetic:
    /// `max(1, ceil(n / batch) / accumulation)` updates per epoch.
    pub fn total_optimizer_steps(&self, num_examples: usize) -> u64 {
        if num_examples == 0 {
            return 0;
        }
        let batches = (num_examples as u64).div_ceil(u64::from(self.per_device_train_batch_size));
        let per_epoch = (batches / u64::from(self.gradient_accumulation_steps)).max(1);
        per_epoch * u64::from(self.num_train_epochs)
    }
}

/// Parameter groups kept frozen during fine-tuning, matched by name prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreezePolicy {
    pub frozen_modules: Vec<String>,
}

impl Default for FreezePolicy {
    fn default() -> Self {
        Self { frozen_modules: vec!["vision_tower".to_string(), "multi_modal_projector".to_string()] }
    }
}

impl FreezePolicy {
    /// Whether a parameter name (e.g. `vision_tower.encoder.layers.0.mlp.fc1.weight`) is frozen.
    pub fn is_frozen(&self, parameter: &str) -> bool {
        self.frozen_modules.iter().any(|m| {
            parameter == m || parameter.strip_prefix(m.as_str()).is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

/// Text prefix the model is conditioned on. `{language}` and `{question}` are substituted per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(pub String);

impl Default for PromptTemplate {
    fn default() -> Self {
        Self("caption {language}".to_string())
    }
}

impl PromptTemplate {
    pub fn render(&self, language: &str, question: &str) -> String {
        self.0.replace("{language}", language).replace("{question}", question)
    }
}

/// Where the fine-tuned model is pushed after a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubTarget {
    /// `None` pushes to `<token owner>/<output_dir name>`.
    pub repo_id: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Checkpoint to continue from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeFrom {
    /// Newest `checkpoint-<step>` in the output directory.
    Latest,
    Path(PathBuf),
}

impl std::str::FromStr for ResumeFrom {
    type Err = TrainingError;

    fn from_str(s: &str) -> TrainingResult<Self> {
        match s.trim() {
            "" => Err(TrainingError::InvalidSpec("resume target is empty".to_string())),
            "latest" => Ok(Self::Latest),
            path => Ok(Self::Path(PathBuf::from(path))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub base_model: ModelSpec,
    pub objective: TrainingObjective,
    pub dataset: DatasetSource,
    pub args: TrainingArguments,
    pub freeze: FreezePolicy,
    pub prompt: PromptTemplate,
    pub resources: TrainingResources,
    pub hub: Option<HubTarget>,
    pub resume: Option<ResumeFrom>,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(base_model: ModelSpec, objective: TrainingObjective, dataset: DatasetSource) -> Self {
        Self {
            job_id: TrainingJobId::new(),
            created_at: Utc::now(),
            base_model,
            objective,
            dataset,
            args: TrainingArguments::default(),
            freeze: FreezePolicy::default(),
            prompt: PromptTemplate::default(),
            resources: TrainingResources::default(),
            hub: None,
            resume: None,
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.base_model.model_id.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("base_model.model_id is required".to_string()));
        }
        if self.base_model.image_size == 0 {
            return Err(TrainingError::InvalidSpec("base_model.image_size must be >= 1".to_string()));
        }
        if self.prompt.0.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("prompt template must not be empty".to_string()));
        }
        if self.args.bf16 && self.base_model.dtype == ModelDtype::F16 {
            return Err(TrainingError::InvalidSpec("bf16 training requires a bf16 or f32 model dtype".to_string()));
        }
        if self.resources.max_steps == Some(0) {
            return Err(TrainingError::InvalidSpec("resources.max_steps must be >= 1 when set".to_string()));
        }
        if let Some(hub) = &self.hub {
            if hub.repo_id.as_deref().is_some_and(|r| r.trim().is_empty()) {
                return Err(TrainingError::InvalidSpec("hub.repo_id must not be empty when set".to_string()));
            }
        }
        self.args.validate()?;
        Ok(())
    }

    /// Step budget for progress reporting.
    pub fn planned_steps(&self, num_examples: usize) -> u64 {
        self.resources.max_steps.unwrap_or_else(|| self.args.total_optimizer_steps(num_examples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TrainingJobSpec {
        TrainingJobSpec::new(
            ModelSpec::default(),
            TrainingObjective::Sft,
            DatasetSource::Jsonl { path: PathBuf::from("x.jsonl") },
        )
    }

    #[test]
    fn test_job_spec_validate_requires_model_id() {
        let mut spec = spec();
        spec.base_model.model_id = "".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_default_arguments_are_valid() {
        let spec = spec();
        spec.validate().unwrap();
        assert_eq!(spec.args.effective_batch_size(), 16);
        assert_eq!(spec.args.output_dir, PathBuf::from("kagglex-paligemma"));
    }

    #[test]
    fn test_arguments_reject_bad_values() {
        let bad = [
            TrainingArguments { num_train_epochs: 0, ..TrainingArguments::default() },
            TrainingArguments { learning_rate: f64::NAN, ..TrainingArguments::default() },
            TrainingArguments { adam_beta2: 1.0, ..TrainingArguments::default() },
            TrainingArguments { save_steps: 0, ..TrainingArguments::default() },
            TrainingArguments { save_total_limit: Some(0), ..TrainingArguments::default() },
        ];
        for args in bad {
            assert!(args.validate().is_err(), "{args:?} should be rejected");
        }
    }

    #[test]
    fn test_total_optimizer_steps() {
        let args = TrainingArguments::default();
        // 100 examples -> 25 batches -> 6 updates per epoch -> 12 over two epochs.
        assert_eq!(args.total_optimizer_steps(100), 12);
        // Fewer batches than the accumulation window still yields one update per epoch.
        assert_eq!(args.total_optimizer_steps(3), 2);
        assert_eq!(args.total_optimizer_steps(0), 0);

        let mut spec = spec();
        spec.resources.max_steps = Some(5);
        assert_eq!(spec.planned_steps(100), 5);
    }

    #[test]
    fn test_freeze_policy_matches_module_prefixes() {
        let policy = FreezePolicy::default();
        assert!(policy.is_frozen("vision_tower.encoder.layers.0.mlp.fc1.weight"));
        assert!(policy.is_frozen("multi_modal_projector.linear.bias"));
        assert!(!policy.is_frozen("language_model.model.layers.0.self_attn.q_proj.weight"));
        assert!(!policy.is_frozen("vision_tower_extra.weight"));
    }

    #[test]
    fn test_prompt_template_render() {
        assert_eq!(PromptTemplate::default().render("sw", "maelezo ya picha hii"), "caption sw");
        let question = PromptTemplate("{question}".to_string());
        assert_eq!(question.render("sw", "maelezo ya picha hii"), "maelezo ya picha hii");
    }

    #[test]
    fn test_resume_from_parse() {
        assert_eq!("latest".parse::<ResumeFrom>().unwrap(), ResumeFrom::Latest);
        assert_eq!(
            "out/checkpoint-5000".parse::<ResumeFrom>().unwrap(),
            ResumeFrom::Path(PathBuf::from("out/checkpoint-5000"))
        );
        assert!("".parse::<ResumeFrom>().is_err());
    }
}
