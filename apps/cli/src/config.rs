//! CLI configuration loading and merging.
//!
//! Configuration precedence:
//! 1. CLI arguments (applied by each command)
//! 2. Explicit `--config` file, or
//! 3. Local config file (`<workspace>/polycap.toml`) over
//! 4. Global config file (`~/.polycap/config.toml`)
//! 5. Defaults

use anyhow::{Context, Result};
use polycap_data::{PrepareConfig, SourceLocation, METADATA_FILE_NAME};
use polycap_training::{
    FreezePolicy, HubTarget, LauncherConfig, ModelSpec, PromptTemplate, TrainingArguments, TrainingResources,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_FILE: &str = "polycap.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolycapConfig {
    pub prepare: PrepareConfig,
    pub train: TrainConfig,
}

/// `[train]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Defaults to `<prepare.output_dir>/metadata.csv`.
    pub metadata: Option<PathBuf>,
    /// Defaults to `prepare.output_dir`.
    pub image_dir: Option<PathBuf>,
    pub push_to_hub: bool,
    pub prompt: PromptTemplate,
    pub model: ModelSpec,
    pub args: TrainingArguments,
    pub freeze: FreezePolicy,
    pub resources: TrainingResources,
    pub hub: HubTarget,
    pub launcher: LauncherConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            metadata: None,
            image_dir: None,
            push_to_hub: true,
            prompt: PromptTemplate::default(),
            model: ModelSpec::default(),
            args: TrainingArguments::default(),
            freeze: FreezePolicy::default(),
            resources: TrainingResources::default(),
            hub: HubTarget::default(),
            launcher: LauncherConfig::default(),
        }
    }
}

impl PolycapConfig {
    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".polycap").join("config.toml"))
    }

    pub fn default_local_path(workspace: &Path) -> PathBuf {
        workspace.join(LOCAL_CONFIG_FILE)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let table = read_table(path)?;
        Self::from_table(table).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Global config, then the workspace's local config on top. Missing files are skipped.
    pub fn discover_and_load(workspace: &Path) -> Result<Self> {
        let mut merged = toml::Table::new();
        let candidates = Self::default_global_path().into_iter().chain([Self::default_local_path(workspace)]);
        for path in candidates {
            if path.is_file() {
                tracing::debug!("Loading configuration from {}", path.display());
                merge_tables(&mut merged, read_table(&path)?);
            }
        }
        Self::from_table(merged).context("Invalid configuration")
    }

    /// `--config` when given, otherwise discovery.
    pub fn load(workspace: &Path, explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => Self::discover_and_load(workspace),
        }
    }

    fn from_table(table: toml::Table) -> Result<Self> {
        Ok(toml::Value::Table(table).try_into()?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Anchor relative paths at `workspace`.
    pub fn resolve_paths(&mut self, workspace: &Path) {
        anchor(&mut self.prepare.output_dir, workspace);
        for source in [&mut self.prepare.afrimmd, &mut self.prepare.avila] {
            if let SourceLocation::Local(path) = source {
                anchor(path, workspace);
            }
        }
        for path in [&mut self.train.metadata, &mut self.train.image_dir].into_iter().flatten() {
            anchor(path, workspace);
        }
        anchor(&mut self.train.args.output_dir, workspace);
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.train.metadata.clone().unwrap_or_else(|| self.prepare.output_dir.join(METADATA_FILE_NAME))
    }

    pub fn image_dir(&self) -> PathBuf {
        self.train.image_dir.clone().unwrap_or_else(|| self.prepare.output_dir.clone())
    }
}

fn anchor(path: &mut PathBuf, workspace: &Path) {
    if path.is_relative() {
        *path = workspace.join(&*path);
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read configuration file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse configuration file {}", path.display()))
}

/// Deep merge: tables merge key by key, anything else in `other` replaces `base`.
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => merge_tables(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
