//! Init command implementation.
//!
//! Writes a `polycap.toml` holding every default so it can be edited in place.

use crate::config::{PolycapConfig, LOCAL_CONFIG_FILE};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

pub fn execute(workspace: &Path, path: Option<PathBuf>, force: bool) -> Result<()> {
    println!("{}", "polycap init".bold().cyan());
    println!();

    let target = match path {
        Some(p) if p.is_absolute() => p,
        Some(p) => workspace.join(p),
        None => workspace.to_path_buf(),
    };
    std::fs::create_dir_all(&target).with_context(|| format!("Failed to create {}", target.display()))?;

    let config_path = target.join(LOCAL_CONFIG_FILE);
    if config_path.exists() && !force {
        println!("{} {} already exists (use --force to overwrite).", "!".yellow(), config_path.display());
        return Ok(());
    }

    let content = PolycapConfig::default().to_toml()?;
    std::fs::write(&config_path, content).with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("  ✓ Created {}", config_path.display());
    println!();
    println!("  {}", "Next: `polycap prepare` builds the dataset, `polycap train run` fine-tunes on it.".dimmed());
    Ok(())
}
