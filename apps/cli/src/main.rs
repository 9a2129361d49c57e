//! Polycap CLI - multilingual image-caption dataset preparation and fine-tuning
//!
//! This CLI provides a `polycap` command that prepares the captioning dataset and
//! launches the captioning fine-tune.

mod commands;
mod config;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{init, prepare, train, PrepareArgs, TrainCommand};

/// Polycap - multilingual image captioning data and training
///
/// Builds a rebalanced multilingual caption dataset from public sources, stages the
/// images, publishes it, and fine-tunes a vision-language model on it.
#[derive(Parser, Debug)]
#[command(name = "polycap", author, version, about = "Polycap - multilingual image captioning data and training")]
struct Args {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` directives take precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Workspace directory (defaults to the current directory)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default polycap.toml
    Init {
        /// Target directory (optional, defaults to the workspace)
        path: Option<PathBuf>,

        /// Overwrite an existing polycap.toml
        #[arg(long)]
        force: bool,
    },

    /// Build, rebalance and publish the caption dataset
    ///
    /// Merges the AfriMMD and AViLa captions, keeps the supported languages,
    /// assigns prompts, rebalances by language, writes metadata.csv, stages the
    /// images and publishes the result to the Hub.
    Prepare(PrepareArgs),

    /// Fine-tune and inspect training runs
    #[command(subcommand)]
    Train(TrainCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = parse_level(&args.log_level);
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    // stdout is reserved for command output (`--json`).
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(level, env.as_deref()))
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let workspace = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Init { path, force } => init::execute(&workspace, path, force),
        Command::Prepare(prepare_args) => prepare::execute(&workspace, prepare_args).await,
        Command::Train(train_command) => train::execute(&workspace, train_command).await,
    }
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `--log-level` as the default directive, refined by `RUST_LOG`-style directives.
fn log_filter(level: Level, directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy(directives.unwrap_or_default())
}
