use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cellscope_core::AnalysisConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::analyze::{handle_analyze_command, AnalyzeArgs};
use commands::detect::{handle_detect_command, DetectArgs};

/// Battery cycler data analysis: capacity fade, health and diagnostics.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults to $CELLSCOPE_CONFIG, then built-in thresholds.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Analyze one or more cycler exports.
    Analyze(AnalyzeArgs),
    /// Report format, equipment and column mapping without running analytics.
    Detect(DetectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze(args) => handle_analyze_command(args, config).await,
        Commands::Detect(args) => handle_detect_command(args, &config).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => AnalysisConfig::from_env().context("failed to load config from environment"),
    }
}
