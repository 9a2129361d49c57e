//! Command type definitions shared between main.rs and the command modules.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct PrepareArgs {
    /// Configuration file (skips ~/.polycap/config.toml and ./polycap.toml discovery)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory receiving metadata.csv and the images
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Rows drawn by the weighted rebalance
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Seed for prompt selection and sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Do not download and stage the image archive
    #[arg(long)]
    pub skip_images: bool,

    /// Do not publish the dataset to the Hub
    #[arg(long)]
    pub skip_publish: bool,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TrainCommand {
    /// Fine-tune the model on prepared metadata
    ///
    /// Builds prefix/caption examples from metadata.csv, checks the first image
    /// batches, then starts the configured launcher and streams its progress.
    Run(TrainRunArgs),

    /// List training runs recorded in this workspace
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct TrainRunArgs {
    /// Configuration file (skips ~/.polycap/config.toml and ./polycap.toml discovery)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Prepared metadata.csv (defaults to <prepare.output_dir>/metadata.csv)
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Directory holding the images referenced by the metadata
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Directory the trainer writes checkpoints and the final model to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Keep the trained model local
    #[arg(long)]
    pub no_push: bool,

    /// Continue from a checkpoint: `latest` or a checkpoint directory
    #[arg(long)]
    pub resume: Option<String>,

    /// Output the training manifest as JSON
    #[arg(long)]
    pub json: bool,
}
