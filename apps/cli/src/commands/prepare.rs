//! Prepare command implementation.

use crate::commands::types::PrepareArgs;
use crate::config::PolycapConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use polycap_data::{run_prepare, PrepareConfig};
use std::path::Path;

pub async fn execute(workspace: &Path, args: PrepareArgs) -> Result<()> {
    let mut config = PolycapConfig::load(workspace, args.config.as_deref())?;
    config.resolve_paths(workspace);
    let prepare = apply_overrides(config.prepare, &args, workspace);

    let summary = run_prepare(&prepare).await.context("Data preparation failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let report = &summary.report;
    println!();
    println!("{}", "Dataset prepared".bold().green());
    println!("  AfriMMD captions:        {}", report.afrimmd_rows);
    println!("  AViLa captions:          {}", report.avila_rows);
    println!("  Duplicate captions:      {}", report.duplicate_captions.to_string().dimmed());
    println!("  Unsupported languages:   {}", report.unsupported_language_rows.to_string().dimmed());
    println!("  Rows after filtering:    {}", report.final_rows);
    println!("  Rows written:            {}", summary.rows_written.to_string().cyan());
    println!("  Metadata:                {}", summary.metadata_path.display());
    if let Some(images) = &summary.images {
        println!("  Images staged:           {} ({} failed)", images.staged, images.failed);
    }
    if let Some(url) = &summary.commit_url {
        println!("  Published:               {}", url.cyan());
    }
    println!();
    Ok(())
}

fn apply_overrides(mut prepare: PrepareConfig, args: &PrepareArgs, workspace: &Path) -> PrepareConfig {
    if let Some(dir) = &args.output_dir {
        prepare.output_dir = if dir.is_absolute() { dir.clone() } else { workspace.join(dir) };
    }
    if let Some(n) = args.sample_size {
        prepare.sample_size = n;
    }
    if let Some(seed) = args.seed {
        prepare.seed = Some(seed);
    }
    if args.skip_images {
        prepare.images.enabled = false;
    }
    if args.skip_publish {
        prepare.publish.enabled = false;
    }
    prepare
}
